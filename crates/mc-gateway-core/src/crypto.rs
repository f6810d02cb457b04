//! Login cryptography: RSA key exchange and the AES-128-CFB8 session cipher.
//!
//! The gateway owns an RSA keypair ([`ServerKey`]). During an encrypted
//! login the client returns a 16-byte shared secret and the echoed verify
//! token, both encrypted under the server's public key with PKCS#1 v1.5
//! padding. The shared secret then keys a CFB8 stream cipher (the secret
//! doubles as the IV) applied to every raw socket byte below the frame
//! layer, with independent encrypt/decrypt states per direction.

use aes::cipher::inout::InOutBuf;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

use crate::error::{ConfigError, ConfigResult, GatewayError, Result};

type Aes128Cfb8Enc = cfb8::Encryptor<Aes128>;
type Aes128Cfb8Dec = cfb8::Decryptor<Aes128>;

/// Length of the login shared secret (AES-128 key).
pub const SHARED_SECRET_LEN: usize = 16;

/// Default RSA key size for a generated server key.
pub const DEFAULT_KEY_BITS: usize = 1024;

/// The gateway's RSA keypair, generated once per listening session.
///
/// Key generation is a capability of construction: tests inject a
/// pre-generated key instead of paying for generation per case.
pub struct ServerKey {
    key: RsaPrivateKey,
    public_der: Vec<u8>,
}

impl ServerKey {
    /// Generate a fresh keypair of `bits` size.
    ///
    /// # Errors
    ///
    /// Returns an error if `bits` is too small to carry a login secret
    /// or if key generation fails.
    pub fn generate(bits: usize) -> ConfigResult<Self> {
        if bits < 512 {
            return Err(ConfigError::KeySizeTooSmall(bits));
        }
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| ConfigError::KeyGeneration(e.to_string()))?;
        Ok(Self::from_private_key(key))
    }

    /// Wrap an existing private key.
    #[must_use]
    pub fn from_private_key(key: RsaPrivateKey) -> Self {
        let public_der = key
            .to_public_key()
            .to_public_key_der()
            .expect("RSA public key is always DER-encodable")
            .as_bytes()
            .to_vec();
        Self { key, public_der }
    }

    /// The public key as SPKI DER, the encoding carried by the
    /// encryption-request packet.
    #[must_use]
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_der
    }

    /// Decrypt a PKCS#1 v1.5 block produced with our public key.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::DecryptionFailed`] on any padding or key
    /// failure; the cause is deliberately not forwarded to the peer.
    pub fn decrypt(&self, block: &[u8]) -> Result<Vec<u8>> {
        self.key
            .decrypt(Pkcs1v15Encrypt, block)
            .map_err(|_| GatewayError::DecryptionFailed)
    }
}

impl std::fmt::Debug for ServerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerKey")
            .field("public_der_len", &self.public_der.len())
            .finish_non_exhaustive()
    }
}

/// Encrypt `data` under a peer's SPKI DER public key (client role of the
/// key exchange, used when logging in to the upstream).
///
/// # Errors
///
/// A malformed upstream public key is a handshake validation failure.
pub fn encrypt_with_public_der(der: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let public = RsaPublicKey::from_public_key_der(der)
        .map_err(|e| GatewayError::HandshakeValidation(format!("bad upstream public key: {e}")))?;
    public
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, data)
        .map_err(|e| GatewayError::HandshakeValidation(format!("RSA encrypt failed: {e}")))
}

fn check_secret(secret: &[u8]) -> Result<()> {
    if secret.len() == SHARED_SECRET_LEN {
        Ok(())
    } else {
        Err(GatewayError::HandshakeValidation(format!(
            "shared secret must be {SHARED_SECRET_LEN} bytes, got {}",
            secret.len()
        )))
    }
}

/// Encrypting half of the session stream cipher.
pub struct StreamEncryptor(Aes128Cfb8Enc);

impl StreamEncryptor {
    /// Key the cipher with a login shared secret (key and IV).
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is not exactly 16 bytes.
    pub fn new(secret: &[u8]) -> Result<Self> {
        check_secret(secret)?;
        Ok(Self(
            Aes128Cfb8Enc::new_from_slices(secret, secret)
                .expect("length checked above"),
        ))
    }

    /// Encrypt `data` in place, advancing the cipher state.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        let (blocks, rest) = InOutBuf::from(data).into_chunks();
        debug_assert!(rest.is_empty());
        self.0.encrypt_blocks_inout_mut(blocks);
    }
}

/// Decrypting half of the session stream cipher.
pub struct StreamDecryptor(Aes128Cfb8Dec);

impl StreamDecryptor {
    /// Key the cipher with a login shared secret (key and IV).
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is not exactly 16 bytes.
    pub fn new(secret: &[u8]) -> Result<Self> {
        check_secret(secret)?;
        Ok(Self(
            Aes128Cfb8Dec::new_from_slices(secret, secret)
                .expect("length checked above"),
        ))
    }

    /// Decrypt `data` in place, advancing the cipher state.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        let (blocks, rest) = InOutBuf::from(data).into_chunks();
        debug_assert!(rest.is_empty());
        self.0.decrypt_blocks_inout_mut(blocks);
    }
}

impl std::fmt::Debug for StreamEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StreamEncryptor(..)")
    }
}

impl std::fmt::Debug for StreamDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StreamDecryptor(..)")
    }
}
