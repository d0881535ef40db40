//! Minimal RLP encoding and the two transaction envelopes the engine
//! emits: legacy EIP-155 and type-2 priority-fee transactions.

use crate::account::keys::keccak256;

/// Encode a byte string.
pub fn encode_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        out.push(bytes[0]);
    } else {
        encode_length(out, bytes.len(), 0x80);
        out.extend_from_slice(bytes);
    }
}

/// Encode an unsigned integer as its minimal big-endian byte string.
pub fn encode_uint(out: &mut Vec<u8>, value: u128) {
    if value == 0 {
        out.push(0x80);
        return;
    }
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(15);
    encode_bytes(out, &bytes[first..]);
}

/// Wrap already-encoded items into a list.
pub fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let body_len: usize = items.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(body_len + 9);
    encode_length(&mut out, body_len, 0xc0);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

fn encode_length(out: &mut Vec<u8>, len: usize, offset: u8) {
    if len < 56 {
        out.push(offset + len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let first = bytes.iter().position(|&b| b != 0).unwrap_or(7);
        let enc = &bytes[first..];
        out.push(offset + 55 + enc.len() as u8);
        out.extend_from_slice(enc);
    }
}

fn item_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_bytes(&mut out, bytes);
    out
}

fn item_uint(value: u128) -> Vec<u8> {
    let mut out = Vec::new();
    encode_uint(&mut out, value);
    out
}

/// Fields of a legacy transaction, pre-signature.
#[derive(Debug, Clone)]
pub struct LegacyTx {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

impl LegacyTx {
    /// The EIP-155 signing digest: keccak of the nine-item payload with
    /// chain id in the v slot and empty r, s.
    pub fn signing_digest(&self) -> [u8; 32] {
        let items = [
            item_uint(self.nonce as u128),
            item_uint(self.gas_price),
            item_uint(self.gas_limit as u128),
            item_bytes(&self.to),
            item_uint(self.value),
            item_bytes(&self.data),
            item_uint(self.chain_id as u128),
            item_uint(0),
            item_uint(0),
        ];
        keccak256(&encode_list(&items))
    }

    /// The broadcast encoding, with v = chain_id * 2 + 35 + recovery id.
    pub fn into_signed(self, r: &[u8; 32], s: &[u8; 32], recovery_id: u8) -> Vec<u8> {
        let v = self.chain_id * 2 + 35 + recovery_id as u64;
        let items = [
            item_uint(self.nonce as u128),
            item_uint(self.gas_price),
            item_uint(self.gas_limit as u128),
            item_bytes(&self.to),
            item_uint(self.value),
            item_bytes(&self.data),
            item_uint(v as u128),
            item_bytes(strip_leading_zeros(r)),
            item_bytes(strip_leading_zeros(s)),
        ];
        encode_list(&items)
    }
}

/// Fields of a type-2 priority-fee transaction, pre-signature.
#[derive(Debug, Clone)]
pub struct Eip1559Tx {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: u128,
    pub max_fee_per_gas: u128,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: u128,
    pub data: Vec<u8>,
}

impl Eip1559Tx {
    fn payload_items(&self) -> Vec<Vec<u8>> {
        vec![
            item_uint(self.chain_id as u128),
            item_uint(self.nonce as u128),
            item_uint(self.max_priority_fee_per_gas),
            item_uint(self.max_fee_per_gas),
            item_uint(self.gas_limit as u128),
            item_bytes(&self.to),
            item_uint(self.value),
            item_bytes(&self.data),
            encode_list(&[]), // access list, always empty here
        ]
    }

    /// keccak(0x02 || rlp(payload)).
    pub fn signing_digest(&self) -> [u8; 32] {
        let mut preimage = vec![0x02];
        preimage.extend_from_slice(&encode_list(&self.payload_items()));
        keccak256(&preimage)
    }

    /// The broadcast encoding: 0x02 || rlp(payload ++ [y_parity, r, s]).
    pub fn into_signed(self, r: &[u8; 32], s: &[u8; 32], y_parity: u8) -> Vec<u8> {
        let mut items = self.payload_items();
        items.push(item_uint(y_parity as u128));
        items.push(item_bytes(strip_leading_zeros(r)));
        items.push(item_bytes(strip_leading_zeros(s)));
        let mut out = vec![0x02];
        out.extend_from_slice(&encode_list(&items));
        out
    }
}

fn strip_leading_zeros(bytes: &[u8; 32]) -> &[u8] {
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(31);
    &bytes[first..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::keys::sign_digest;
    use k256::ecdsa::SigningKey;

    #[test]
    fn rlp_primitive_vectors() {
        let mut out = Vec::new();
        encode_bytes(&mut out, b"dog");
        assert_eq!(hex::encode(&out), "83646f67");

        assert_eq!(hex::encode(encode_list(&[])), "c0");

        let mut zero = Vec::new();
        encode_uint(&mut zero, 0);
        assert_eq!(hex::encode(&zero), "80");

        let mut fifteen = Vec::new();
        encode_uint(&mut fifteen, 15);
        assert_eq!(hex::encode(&fifteen), "0f");

        let mut kilo = Vec::new();
        encode_uint(&mut kilo, 1024);
        assert_eq!(hex::encode(&kilo), "820400");
    }

    fn eip155_example() -> LegacyTx {
        LegacyTx {
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: [0x35; 20],
            value: 1_000_000_000_000_000_000,
            data: Vec::new(),
            chain_id: 1,
        }
    }

    #[test]
    fn legacy_signing_digest_matches_eip155_example() {
        let digest = eip155_example().signing_digest();
        assert_eq!(
            hex::encode(digest),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }

    #[test]
    fn legacy_signed_encoding_matches_eip155_example() {
        let tx = eip155_example();
        let key = SigningKey::from_slice(&[0x46; 32]).unwrap();
        let (signature, recovery) = sign_digest(&key, &tx.signing_digest()).unwrap();
        let r: [u8; 32] = signature.r().to_bytes().into();
        let s: [u8; 32] = signature.s().to_bytes().into();
        let raw = tx.into_signed(&r, &s, recovery.to_byte());
        assert_eq!(
            hex::encode(raw),
            "f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
    }

    #[test]
    fn type2_envelope_shape() {
        let tx = Eip1559Tx {
            chain_id: 1,
            nonce: 0,
            max_priority_fee_per_gas: 1_000_000_000,
            max_fee_per_gas: 30_000_000_000,
            gas_limit: 21_000,
            to: [0x35; 20],
            value: 1,
            data: Vec::new(),
        };
        let digest_a = tx.signing_digest();
        let digest_b = tx.signing_digest();
        assert_eq!(digest_a, digest_b);

        let raw = tx.into_signed(&[1u8; 32], &[2u8; 32], 1);
        assert_eq!(raw[0], 0x02);
        // List header follows the type byte.
        assert!(raw[1] >= 0xc0);
    }
}
