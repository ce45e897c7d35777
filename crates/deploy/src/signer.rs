//! Transaction signers.
//!
//! Development nodes hold unlocked accounts and sign for us through
//! `eth_sendTransaction`. Live networks get an EIP-155 legacy transaction signed
//! locally with the deployer's secp256k1 key.

use std::fmt;

use alloy_core::primitives::{Address, B256, Bytes, U256, keccak256};
use alloy_core::rlp::{EMPTY_STRING_CODE, Encodable, Header};
use anyhow::{Context, Result};
use k256::ecdsa::SigningKey;

use crate::rpc::{RpcClient, TransactionRequest};

/// A legacy (type 0) transaction with EIP-155 replay protection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    /// `None` creates a contract.
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    pub chain_id: u64,
}

impl LegacyTransaction {
    fn encode_fields(&self, out: &mut Vec<u8>) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        match self.to {
            Some(to) => to.encode(out),
            None => out.push(EMPTY_STRING_CODE),
        }
        self.value.encode(out);
        self.data.encode(out);
    }

    /// Hash signed by the sender: `keccak256(rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0]))`.
    pub fn signature_hash(&self) -> B256 {
        let mut payload = Vec::new();
        self.encode_fields(&mut payload);
        self.chain_id.encode(&mut payload);
        0u8.encode(&mut payload);
        0u8.encode(&mut payload);
        keccak256(rlp_list(payload))
    }

    /// RLP encoding of the signed transaction, ready for `eth_sendRawTransaction`.
    pub fn encode_signed(&self, recovery_id: u8, r: U256, s: U256) -> Result<Bytes> {
        let v = self
            .chain_id
            .checked_mul(2)
            .and_then(|v| v.checked_add(35 + u64::from(recovery_id)))
            .with_context(|| format!("Chain ID {} is too large for EIP-155", self.chain_id))?;

        let mut payload = Vec::new();
        self.encode_fields(&mut payload);
        v.encode(&mut payload);
        r.encode(&mut payload);
        s.encode(&mut payload);
        Ok(rlp_list(payload).into())
    }
}

fn rlp_list(payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 9);
    Header {
        list: true,
        payload_length: payload.len(),
    }
    .encode(&mut out);
    out.extend_from_slice(&payload);
    out
}

/// Derive the Ethereum address of a secp256k1 key.
fn address_of(signing_key: &SigningKey) -> Address {
    // Uncompressed point: 0x04 prefix followed by the 64 byte public key.
    let public_key_point = signing_key.verifying_key().to_encoded_point(false);
    let hash = keccak256(&public_key_point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// A private key held in memory.
#[derive(Clone)]
pub struct LocalSigner {
    signing_key: SigningKey,
    address: Address,
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    /// Create a signer from a private key.
    ///
    /// # Arguments
    /// * `private_key_hex` - 32-byte private key as hex string (with or without 0x prefix)
    pub fn from_private_key(private_key_hex: &str) -> Result<Self> {
        let private_key_hex = private_key_hex
            .trim()
            .strip_prefix("0x")
            .unwrap_or(private_key_hex.trim());

        let private_key_bytes: [u8; 32] = hex::decode(private_key_hex)
            .context("Private key is not valid hex")?
            .try_into()
            .map_err(|_| anyhow::anyhow!("Private key must be exactly 32 bytes"))?;

        let signing_key = SigningKey::from_bytes(&private_key_bytes.into())
            .map_err(|e| anyhow::anyhow!("Invalid secp256k1 private key: {}", e))?;
        let address = address_of(&signing_key);

        Ok(Self {
            signing_key,
            address,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a 32 byte digest, returning `(recovery_id, r, s)`.
    pub fn sign_hash(&self, hash: &B256) -> Result<(u8, U256, U256)> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|e| anyhow::anyhow!("Failed to sign digest: {}", e))?;

        let bytes = signature.to_bytes();
        Ok((
            recovery_id.to_byte(),
            U256::from_be_slice(&bytes[..32]),
            U256::from_be_slice(&bytes[32..]),
        ))
    }

    /// Sign `tx` and return its raw encoding.
    pub fn sign_transaction(&self, tx: &LegacyTransaction) -> Result<Bytes> {
        let (recovery_id, r, s) = self.sign_hash(&tx.signature_hash())?;
        tx.encode_signed(recovery_id, r, s)
    }
}

/// The account transactions are sent from.
#[derive(Debug, Clone)]
pub enum Signer {
    /// An account unlocked on the node.
    Unlocked(Address),
    /// A key held by the harness.
    Local(LocalSigner),
}

impl Signer {
    pub fn address(&self) -> Address {
        match self {
            Self::Unlocked(address) => *address,
            Self::Local(signer) => signer.address(),
        }
    }

    /// Submit a transaction and return its hash without waiting for inclusion.
    pub async fn send(
        &self,
        rpc: &RpcClient,
        chain_id: u64,
        to: Option<Address>,
        data: Bytes,
    ) -> Result<B256> {
        let request = TransactionRequest {
            from: Some(self.address()),
            to,
            data: Some(data.clone()),
            ..Default::default()
        };

        match self {
            Self::Unlocked(_) => rpc
                .send_transaction(&request)
                .await
                .context("Failed to send transaction"),
            Self::Local(signer) => {
                let nonce = rpc.transaction_count(signer.address()).await?;
                let gas_price = rpc.gas_price().await?;
                let gas_limit = rpc
                    .estimate_gas(&request)
                    .await
                    .context("Failed to estimate gas")?;

                tracing::debug!(nonce, gas_price, gas_limit, chain_id, "Signing transaction");

                let tx = LegacyTransaction {
                    nonce,
                    gas_price,
                    gas_limit,
                    to,
                    value: U256::ZERO,
                    data,
                    chain_id,
                };
                let raw = signer.sign_transaction(&tx)?;
                rpc.send_raw_transaction(&raw)
                    .await
                    .context("Failed to send raw transaction")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::{address, b256};
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

    /// The example transaction of EIP-155.
    fn eip155_example() -> LegacyTransaction {
        LegacyTransaction {
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: Some(address!("3535353535353535353535353535353535353535")),
            value: U256::from(1_000_000_000_000_000_000u128),
            data: Bytes::new(),
            chain_id: 1,
        }
    }

    const EXAMPLE_KEY: &str = "0x4646464646464646464646464646464646464646464646464646464646464646";

    #[test]
    fn test_signature_hash_matches_eip155() {
        assert_eq!(
            eip155_example().signature_hash(),
            b256!("daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53")
        );
    }

    #[test]
    fn test_address_from_private_key() {
        let signer = LocalSigner::from_private_key(EXAMPLE_KEY).unwrap();
        assert_eq!(
            signer.address(),
            address!("9d8A62f656a8d1615C1294fd71e9CFb3E4855A4F")
        );

        // Hardhat / Anvil account #0.
        let signer = LocalSigner::from_private_key(
            "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        )
        .unwrap();
        assert_eq!(
            signer.address(),
            address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
        );
    }

    #[test]
    fn test_invalid_private_keys() {
        assert!(LocalSigner::from_private_key("0x1234").is_err());
        assert!(LocalSigner::from_private_key("not hex at all").is_err());
        assert!(LocalSigner::from_private_key(&format!("0x{}", "00".repeat(32))).is_err());
    }

    #[test]
    fn test_signature_recovers_sender() {
        let signer = LocalSigner::from_private_key(EXAMPLE_KEY).unwrap();
        let hash = eip155_example().signature_hash();
        let (recovery_id, r, s) = signer.sign_hash(&hash).unwrap();

        let mut sig_bytes = [0u8; 64];
        sig_bytes[..32].copy_from_slice(&r.to_be_bytes::<32>());
        sig_bytes[32..].copy_from_slice(&s.to_be_bytes::<32>());
        let signature = Signature::from_slice(&sig_bytes).unwrap();

        let recovered = VerifyingKey::recover_from_prehash(
            hash.as_slice(),
            &signature,
            RecoveryId::from_byte(recovery_id).unwrap(),
        )
        .unwrap();
        let point = recovered.to_encoded_point(false);
        let recovered_address = Address::from_slice(&keccak256(&point.as_bytes()[1..])[12..]);
        assert_eq!(recovered_address, signer.address());
    }

    #[test]
    fn test_signed_transaction_carries_eip155_v() {
        let signer = LocalSigner::from_private_key(EXAMPLE_KEY).unwrap();
        let tx = eip155_example();
        let (recovery_id, r, s) = signer.sign_hash(&tx.signature_hash()).unwrap();
        let raw = signer.sign_transaction(&tx).unwrap();
        assert_eq!(raw, tx.encode_signed(recovery_id, r, s).unwrap());

        // Chain 1: v is 37 or 38.
        let with_v37 = tx.encode_signed(0, r, s).unwrap();
        let with_v38 = tx.encode_signed(1, r, s).unwrap();
        assert_ne!(with_v37, with_v38);
        assert!(raw == with_v37 || raw == with_v38);
    }

    #[test]
    fn test_contract_creation_encodes_empty_to() {
        let tx = LegacyTransaction {
            to: None,
            data: Bytes::from_static(&[0x60, 0x80]),
            ..eip155_example()
        };
        let unsigned = tx.encode_signed(0, U256::from(1), U256::from(1)).unwrap();
        // nonce 0x09, gas price, gas limit, then the empty `to` string.
        let expected_prefix = [0x09, 0x85, 0x04, 0xa8, 0x17, 0xc8, 0x00, 0x82, 0x52, 0x08, 0x80];
        assert_eq!(&unsigned[1..1 + expected_prefix.len()], &expected_prefix);
    }

    #[test]
    fn test_oversized_chain_id_is_an_error() {
        let signer = LocalSigner::from_private_key(EXAMPLE_KEY).unwrap();
        let tx = LegacyTransaction {
            chain_id: u64::MAX / 2,
            ..eip155_example()
        };

        let err = signer.sign_transaction(&tx).unwrap_err();
        assert!(err.to_string().contains("too large for EIP-155"));
        assert!(tx.encode_signed(0, U256::from(1), U256::from(1)).is_err());

        // The largest chain ID that still fits.
        let tx = LegacyTransaction {
            chain_id: (u64::MAX - 36) / 2,
            ..eip155_example()
        };
        assert!(tx.encode_signed(1, U256::from(1), U256::from(1)).is_ok());
    }
}
