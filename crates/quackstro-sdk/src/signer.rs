//! The signing seam.
//!
//! Key storage, passphrase handling, and derivation live outside this crate;
//! transaction builders only ever see [`SpendSigner`]. [`SoftwareSigner`] is
//! the in-process implementation used by the wallet once the keystore has
//! handed over a derived key.

use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Signs spend sighashes. Implementations must never expose raw key bytes.
pub trait SpendSigner: Send + Sync {
    /// Compressed SEC1 public key.
    fn public_key(&self) -> [u8; 33];

    /// ECDSA-sign a 32-byte sighash; returns the DER signature *without* the
    /// trailing sighash-type byte (the transaction builder appends it).
    fn sign_ecdsa(&self, sighash: &[u8; 32]) -> Result<Vec<u8>>;
}

/// In-memory signer over secp256k1. The secret is held in a zeroizing buffer
/// and wiped when the signer is dropped.
pub struct SoftwareSigner {
    secret: Zeroizing<[u8; 32]>,
    public: [u8; 33],
    ctx: Secp256k1<secp256k1::All>,
}

impl SoftwareSigner {
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self> {
        let ctx = Secp256k1::new();
        let sk = SecretKey::from_slice(secret)
            .map_err(|e| Error::Signer(format!("invalid secret key: {e}")))?;
        let public = PublicKey::from_secret_key(&ctx, &sk).serialize();
        Ok(Self {
            secret: Zeroizing::new(*secret),
            public,
            ctx,
        })
    }

    /// Fresh random keypair (test and tooling use).
    pub fn random() -> Self {
        let ctx = Secp256k1::new();
        let (sk, pk) = ctx.generate_keypair(&mut rand::thread_rng());
        Self {
            secret: Zeroizing::new(sk.secret_bytes()),
            public: pk.serialize(),
            ctx,
        }
    }
}

impl SpendSigner for SoftwareSigner {
    fn public_key(&self) -> [u8; 33] {
        self.public
    }

    fn sign_ecdsa(&self, sighash: &[u8; 32]) -> Result<Vec<u8>> {
        let sk = SecretKey::from_slice(self.secret.as_ref())
            .map_err(|e| Error::Signer(format!("invalid secret key: {e}")))?;
        let msg = Message::from_digest_slice(sighash)
            .map_err(|e| Error::Signer(format!("invalid sighash: {e}")))?;
        let sig = self.ctx.sign_ecdsa(&msg, &sk);
        Ok(sig.serialize_der().to_vec())
    }
}
