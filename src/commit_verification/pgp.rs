// Copyright 2025 The Sigstore Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Just enough OpenPGP (RFC 4880) to name the key behind a signature.

use base64::{engine::general_purpose::STANDARD as BASE64_STD_ENGINE, Engine as _};

const SIGNATURE_PACKET: u8 = 2;
const ISSUER_SUBPACKET: u8 = 16;
const ISSUER_FINGERPRINT_SUBPACKET: u8 = 33;

/// Key id of the issuer of an ASCII armored PGP signature, as upper case
/// hex. `None` when the signature cannot be decoded or names no issuer.
pub(crate) fn issuer_key_id(armored: &str) -> Option<String> {
    let packet = dearmor(armored)?;
    let body = signature_body(&packet)?;

    // v4 body: version, type, key algorithm, hash algorithm, then the
    // hashed and unhashed subpacket areas.
    if body.first() != Some(&4) {
        return None;
    }
    let (hashed, rest) = length_prefixed(body.get(4..)?)?;
    let (unhashed, _) = length_prefixed(rest)?;

    let mut fingerprint = None;
    for (kind, data) in subpackets(hashed).chain(subpackets(unhashed)) {
        match kind {
            ISSUER_SUBPACKET if data.len() == 8 => return Some(hex::encode_upper(data)),
            ISSUER_FINGERPRINT_SUBPACKET => fingerprint = fingerprint.or(key_id_of(data)),
            _ => {}
        }
    }
    fingerprint
}

fn dearmor(armored: &str) -> Option<Vec<u8>> {
    let mut lines = armored.lines().map(str::trim);
    lines.find(|l| l.starts_with("-----BEGIN PGP SIGNATURE-----"))?;
    let encoded: String = lines
        .take_while(|l| !l.starts_with('=') && !l.starts_with("-----END"))
        .filter(|l| !l.is_empty() && !l.contains(':'))
        .collect();
    BASE64_STD_ENGINE.decode(encoded).ok()
}

/// Body of the first packet, which must be a signature.
fn signature_body(packet: &[u8]) -> Option<&[u8]> {
    let header = *packet.first()?;
    if header & 0x80 == 0 {
        return None;
    }
    let (tag, len, offset): (u8, usize, usize) = if header & 0x40 != 0 {
        let first = *packet.get(1)? as usize;
        match first {
            0..=191 => (header & 0x3f, first, 2),
            192..=223 => (
                header & 0x3f,
                ((first - 192) << 8) + *packet.get(2)? as usize + 192,
                3,
            ),
            255 => (header & 0x3f, be_len(packet.get(2..6)?), 6),
            _ => return None,
        }
    } else {
        let tag = (header >> 2) & 0x0f;
        match header & 0x03 {
            0 => (tag, *packet.get(1)? as usize, 2),
            1 => (tag, be_len(packet.get(1..3)?), 3),
            2 => (tag, be_len(packet.get(1..5)?), 5),
            _ => (tag, packet.len().checked_sub(1)?, 1),
        }
    };
    if tag != SIGNATURE_PACKET {
        return None;
    }
    packet.get(offset..offset.checked_add(len)?)
}

fn be_len(bytes: &[u8]) -> usize {
    bytes.iter().fold(0, |acc, b| (acc << 8) | *b as usize)
}

/// Split a two octet length prefixed area off `data`.
fn length_prefixed(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let len = be_len(data.get(..2)?);
    let area = data.get(2..2 + len)?;
    Some((area, &data[2 + len..]))
}

/// (type, data) of every well formed subpacket in `area`.
fn subpackets(mut area: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    std::iter::from_fn(move || {
        let first = *area.first()? as usize;
        let (len, offset) = match first {
            0..=191 => (first, 1),
            192..=254 => (((first - 192) << 8) + *area.get(1)? as usize + 192, 2),
            _ => (be_len(area.get(1..5)?), 5),
        };
        let subpacket = area.get(offset..offset + len)?;
        area = &area[offset + len..];
        let (kind, data) = subpacket.split_first()?;
        Some((kind & 0x7f, data))
    })
}

/// v4 key ids are the low 64 bits of the fingerprint, v5 ones the high.
fn key_id_of(fingerprint: &[u8]) -> Option<String> {
    match fingerprint.split_first()? {
        (4, fp) if fp.len() == 20 => Some(hex::encode_upper(&fp[12..])),
        (5, fp) if fp.len() == 32 => Some(hex::encode_upper(&fp[..8])),
        _ => None,
    }
}
