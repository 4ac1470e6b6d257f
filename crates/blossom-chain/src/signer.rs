//! Relayer-held signing key and EIP-1559 transaction encoding.
//!
//! Only the one typed-transaction shape the relayer submits is encoded
//! here, so the RLP helpers stay private and minimal.

use alloy_primitives::{Address, U256, keccak256};
use libsecp256k1::{Message, PublicKey, SecretKey};

use crate::error::{ChainError, ChainResult};

/// An unsigned EIP-1559 transaction. Chain id comes from the signer.
#[derive(Debug, Clone)]
pub struct Eip1559Tx {
    pub nonce: u64,
    pub max_priority_fee_per_gas: u128,
    pub max_fee_per_gas: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
}

/// Signs transactions with the relayer key for one configured chain.
pub struct TxSigner {
    secret: SecretKey,
    address: Address,
    chain_id: u64,
}

impl TxSigner {
    pub fn from_hex(key_hex: &str, chain_id: u64) -> ChainResult<Self> {
        let bytes = hex::decode(key_hex.trim_start_matches("0x"))
            .map_err(|e| ChainError::Signer(format!("relayer key is not hex: {e}")))?;
        let raw: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChainError::Signer("relayer key must be 32 bytes".into()))?;
        let secret = SecretKey::parse(&raw)
            .map_err(|e| ChainError::Signer(format!("invalid relayer key: {e:?}")))?;
        let public = PublicKey::from_secret_key(&secret);
        // uncompressed SEC1 encoding, skip the 0x04 tag
        let hash = keccak256(&public.serialize()[1..]);
        let address = Address::from_slice(&hash[12..]);
        Ok(Self {
            secret,
            address,
            chain_id,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Produce the raw signed transaction bytes (`0x02 || rlp(...)`) ready
    /// for `eth_sendRawTransaction`.
    pub fn sign(&self, tx: &Eip1559Tx) -> ChainResult<Vec<u8>> {
        let unsigned_fields = self.base_fields(tx);
        let mut preimage = vec![0x02u8];
        preimage.extend_from_slice(&rlp_list(&unsigned_fields));
        let digest = keccak256(&preimage);

        let message = Message::parse(&digest.0);
        let (signature, recovery_id) = libsecp256k1::sign(&message, &self.secret);
        let sig = signature.serialize();

        let mut fields = unsigned_fields;
        fields.push(rlp_uint(u64::from(recovery_id.serialize()) as u128));
        fields.push(rlp_bytes(strip_leading_zeros(&sig[..32])));
        fields.push(rlp_bytes(strip_leading_zeros(&sig[32..])));

        let mut raw = vec![0x02u8];
        raw.extend_from_slice(&rlp_list(&fields));
        Ok(raw)
    }

    fn base_fields(&self, tx: &Eip1559Tx) -> Vec<Vec<u8>> {
        vec![
            rlp_uint(u128::from(self.chain_id)),
            rlp_uint(u128::from(tx.nonce)),
            rlp_uint(tx.max_priority_fee_per_gas),
            rlp_uint(tx.max_fee_per_gas),
            rlp_uint(u128::from(tx.gas_limit)),
            rlp_bytes(tx.to.as_slice()),
            rlp_bytes(strip_leading_zeros(&tx.value.to_be_bytes::<32>())),
            rlp_bytes(&tx.data),
            // empty access list
            rlp_list(&[]),
        ]
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn rlp_length_prefix(len: usize, short_tag: u8, long_tag: u8) -> Vec<u8> {
    if len <= 55 {
        vec![short_tag + len as u8]
    } else {
        let len_bytes = len.to_be_bytes();
        let trimmed = strip_leading_zeros(&len_bytes);
        let mut out = vec![long_tag + trimmed.len() as u8];
        out.extend_from_slice(trimmed);
        out
    }
}

fn rlp_bytes(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        return bytes.to_vec();
    }
    let mut out = rlp_length_prefix(bytes.len(), 0x80, 0xb7);
    out.extend_from_slice(bytes);
    out
}

fn rlp_uint(v: u128) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    rlp_bytes(strip_leading_zeros(&bytes))
}

fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_len: usize = items.iter().map(Vec::len).sum();
    let mut out = rlp_length_prefix(payload_len, 0xc0, 0xf7);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "4646464646464646464646464646464646464646464646464646464646464646";

    #[test]
    fn rlp_scalar_vectors() {
        assert_eq!(rlp_bytes(b""), vec![0x80]);
        assert_eq!(rlp_bytes(b"dog"), vec![0x83, b'd', b'o', b'g']);
        assert_eq!(rlp_uint(0), vec![0x80]);
        assert_eq!(rlp_uint(15), vec![0x0f]);
        assert_eq!(rlp_uint(1024), vec![0x82, 0x04, 0x00]);
        assert_eq!(rlp_list(&[]), vec![0xc0]);
    }

    #[test]
    fn rlp_long_string_uses_long_form() {
        let data = vec![0x61u8; 56];
        let enc = rlp_bytes(&data);
        assert_eq!(enc[0], 0xb8);
        assert_eq!(enc[1], 56);
        assert_eq!(enc.len(), 58);
    }

    #[test]
    fn derives_known_address() {
        // EIP-155 example key
        let signer = TxSigner::from_hex(TEST_KEY, 1).unwrap();
        assert_eq!(
            format!("{}", signer.address()).to_lowercase(),
            "0x9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f"
        );
    }

    #[test]
    fn signed_tx_is_typed_and_parseable_prefix() {
        let signer = TxSigner::from_hex(TEST_KEY, 8453).unwrap();
        let raw = signer
            .sign(&Eip1559Tx {
                nonce: 9,
                max_priority_fee_per_gas: 1_000_000_000,
                max_fee_per_gas: 20_000_000_000,
                gas_limit: 21_000,
                to: Address::repeat_byte(0x35),
                value: U256::from(10u64).pow(U256::from(18u64)),
                data: vec![],
            })
            .unwrap();
        assert_eq!(raw[0], 0x02);
        // list header follows the type byte
        assert!(raw[1] >= 0xc0);
        // signing is deterministic only per-nonce; same input, same output
        let again = signer
            .sign(&Eip1559Tx {
                nonce: 9,
                max_priority_fee_per_gas: 1_000_000_000,
                max_fee_per_gas: 20_000_000_000,
                gas_limit: 21_000,
                to: Address::repeat_byte(0x35),
                value: U256::from(10u64).pow(U256::from(18u64)),
                data: vec![],
            })
            .unwrap();
        assert_eq!(raw, again);
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(TxSigner::from_hex("0xzz", 1).is_err());
        assert!(TxSigner::from_hex("0x0102", 1).is_err());
        // zero is not a valid secp256k1 scalar
        assert!(TxSigner::from_hex(&"00".repeat(32), 1).is_err());
    }
}
