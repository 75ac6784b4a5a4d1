use openssl::error::ErrorStack;
use openssl::pkey::Private;
use openssl::rsa::{Padding, Rsa};
use openssl::symm::{Cipher, Crypter, Mode};

use crate::err::ProtError;

pub(crate) const SHARED_SECRET_LEN: usize = 16;
const KEY_BITS: u32 = 1024;

pub(crate) type VerifyToken = [u8; 4];

/// The server's RSA keypair. Generated once at startup and never mutated afterwards.
pub(crate) struct KeyPair {
    key: Rsa<Private>,
    public_der: Vec<u8>,
}

impl KeyPair {
    pub(crate) fn generate() -> Result<Self, ErrorStack> {
        let key = Rsa::generate(KEY_BITS)?;
        // SubjectPublicKeyInfo, the encoding clients expect in the encryption request
        let public_der = key.public_key_to_der()?;
        Ok(Self { key, public_der })
    }

    pub(crate) fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    pub(crate) fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, ProtError> {
        let mut plain = vec![0; self.key.size() as usize];
        let num = self.key.private_decrypt(data, &mut plain, Padding::PKCS1)?;
        plain.truncate(num);
        Ok(plain)
    }
}

pub(crate) fn new_verify_token() -> VerifyToken {
    rand::random()
}

/// Brings a decrypted shared secret into wire byte order and checks its length.
///
/// OpenSSL hands the PKCS#1 payload back in the order it was encrypted, which already is
/// wire order, so no bytes move here.
pub(crate) fn wire_order_secret(decrypted: &[u8]) -> Result<[u8; SHARED_SECRET_LEN], ProtError> {
    decrypted.try_into().map_err(|_| {
        ProtError::Crypto(format!(
            "shared secret has {} bytes, expected {}",
            decrypted.len(),
            SHARED_SECRET_LEN
        ))
    })
}

/// AES-128 in 8-bit cipher feedback mode. The context carries feedback state between calls,
/// so bytes must be fed in stream order.
pub(crate) struct StreamCipher {
    crypter: Crypter,
}

impl StreamCipher {
    fn new(secret: &[u8; SHARED_SECRET_LEN], mode: Mode) -> Result<Self, ErrorStack> {
        let mut crypter = Crypter::new(Cipher::aes_128_cfb8(), mode, secret, Some(secret))?;
        crypter.pad(false);
        Ok(Self { crypter })
    }

    /// Runs `data` through the cipher in place.
    pub(crate) fn apply(&mut self, data: &mut [u8]) -> Result<(), ProtError> {
        if data.is_empty() {
            return Ok(());
        }
        let mut out = vec![0u8; data.len() + Cipher::aes_128_cfb8().block_size()];
        let num = self.crypter.update(data, &mut out)?;
        if num != data.len() {
            return Err(ProtError::Crypto(format!(
                "cipher produced {} bytes for {} input bytes",
                num,
                data.len()
            )));
        }
        data.copy_from_slice(&out[..num]);
        Ok(())
    }
}

/// Both directions of one connection, keyed from the same shared secret.
pub(crate) struct CipherPair {
    pub(crate) encrypt: StreamCipher,
    pub(crate) decrypt: StreamCipher,
}

impl CipherPair {
    pub(crate) fn new(secret: &[u8; SHARED_SECRET_LEN]) -> Result<Self, ProtError> {
        let encrypt = StreamCipher::new(secret, Mode::Encrypt)
            .map_err(|e| ProtError::Crypto(format!("could not start encryption cipher: {e}")))?;
        let decrypt = StreamCipher::new(secret, Mode::Decrypt)
            .map_err(|e| ProtError::Crypto(format!("could not start decryption cipher: {e}")))?;
        Ok(Self { encrypt, decrypt })
    }
}
