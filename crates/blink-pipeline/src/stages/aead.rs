//! AEAD encryption stage.
//!
//! Stream mode, per direction:
//!
//! ```text
//! +------+----------------------+----------------------+-----
//! | SALT | [LEN(2)+TAG] | [DATA+TAG] | [LEN(2)+TAG] | ...
//! +------+----------------------+----------------------+-----
//! ```
//!
//! Each direction draws its own random salt; the session subkey is
//! HKDF-SHA256(salt, master key, info). Nonces are a little-endian counter
//! incremented after every seal/open. Payload chunks are at most
//! [`MAX_CHUNK`] bytes.
//!
//! Datagram mode: `SALT | DATA+TAG` per datagram with a zero nonce.

use std::sync::Arc;

use aes_gcm::{Aes128Gcm, Aes256Gcm};
use bytes::{BufMut, Bytes, BytesMut};
use chacha20poly1305::ChaCha20Poly1305;
use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::{Aead, KeyInit};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{BuildError, StageError};
use crate::stage::{Stage, StageOutput, TransportKind};

pub const NAME: &str = "aead";

/// Largest payload carried by one stream chunk.
pub const MAX_CHUNK: usize = 0x3FFF;
pub const TAG_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;

const MASTER_KEY_INFO: &[u8] = b"blinksocks-master-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadMethod {
    ChaCha20Poly1305,
    Aes128Gcm,
    Aes256Gcm,
}

impl AeadMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "chacha20-poly1305" | "chacha20-ietf-poly1305" => Some(Self::ChaCha20Poly1305),
            "aes-128-gcm" => Some(Self::Aes128Gcm),
            "aes-256-gcm" => Some(Self::Aes256Gcm),
            _ => None,
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128Gcm => 16,
            Self::ChaCha20Poly1305 | Self::Aes256Gcm => 32,
        }
    }

    /// Salt length equals key length.
    pub fn salt_len(self) -> usize {
        self.key_len()
    }
}

/// Validated, shareable parameters for building AEAD stages.
pub struct AeadParams {
    method: AeadMethod,
    info: Vec<u8>,
    master_key: Zeroizing<Vec<u8>>,
}

impl AeadParams {
    pub fn new(method: AeadMethod, info: &str, key: &str) -> Result<Self, BuildError> {
        if key.is_empty() {
            return Err(BuildError::EmptyKey);
        }
        let mut master_key = Zeroizing::new(vec![0u8; method.key_len()]);
        Hkdf::<Sha256>::new(None, key.as_bytes())
            .expand(MASTER_KEY_INFO, &mut master_key)
            .map_err(|_| BuildError::InvalidParams {
                stage: NAME.into(),
                message: "key derivation failed".into(),
            })?;
        Ok(Self {
            method,
            info: info.as_bytes().to_vec(),
            master_key,
        })
    }

    pub fn method(&self) -> AeadMethod {
        self.method
    }

    fn subkey(&self, salt: &[u8]) -> Result<Cipher, StageError> {
        let mut key = Zeroizing::new(vec![0u8; self.method.key_len()]);
        Hkdf::<Sha256>::new(Some(salt), &self.master_key)
            .expand(&self.info, &mut key)
            .map_err(|_| StageError::Crypto("subkey derivation failed"))?;
        Cipher::new(self.method, &key)
    }
}

impl std::fmt::Debug for AeadParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadParams")
            .field("method", &self.method)
            .field("info", &String::from_utf8_lossy(&self.info))
            .finish_non_exhaustive()
    }
}

enum Cipher {
    ChaCha20Poly1305(ChaCha20Poly1305),
    Aes128Gcm(Aes128Gcm),
    Aes256Gcm(Aes256Gcm),
}

impl Cipher {
    fn new(method: AeadMethod, key: &[u8]) -> Result<Self, StageError> {
        let bad_key = |_| StageError::Crypto("invalid key length");
        Ok(match method {
            AeadMethod::ChaCha20Poly1305 => {
                Self::ChaCha20Poly1305(ChaCha20Poly1305::new_from_slice(key).map_err(bad_key)?)
            }
            AeadMethod::Aes128Gcm => Self::Aes128Gcm(Aes128Gcm::new_from_slice(key).map_err(bad_key)?),
            AeadMethod::Aes256Gcm => Self::Aes256Gcm(Aes256Gcm::new_from_slice(key).map_err(bad_key)?),
        })
    }

    fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, StageError> {
        let nonce = GenericArray::from_slice(nonce);
        let sealed = match self {
            Self::ChaCha20Poly1305(c) => c.encrypt(nonce, plaintext),
            Self::Aes128Gcm(c) => c.encrypt(nonce, plaintext),
            Self::Aes256Gcm(c) => c.encrypt(nonce, plaintext),
        };
        sealed.map_err(|_| StageError::Crypto("encryption failed"))
    }

    fn open(&self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, StageError> {
        let nonce = GenericArray::from_slice(nonce);
        let opened = match self {
            Self::ChaCha20Poly1305(c) => c.decrypt(nonce, ciphertext),
            Self::Aes128Gcm(c) => c.decrypt(nonce, ciphertext),
            Self::Aes256Gcm(c) => c.decrypt(nonce, ciphertext),
        };
        opened.map_err(|_| StageError::Authentication)
    }
}

/// A cipher bound to a nonce counter.
struct Session {
    cipher: Cipher,
    nonce: [u8; NONCE_LEN],
}

impl Session {
    fn new(cipher: Cipher) -> Self {
        Self {
            cipher,
            nonce: [0u8; NONCE_LEN],
        }
    }

    fn seal_next(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, StageError> {
        let sealed = self.cipher.seal(&self.nonce, plaintext)?;
        increment(&mut self.nonce);
        Ok(sealed)
    }

    fn open_next(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, StageError> {
        let opened = self.cipher.open(&self.nonce, ciphertext)?;
        increment(&mut self.nonce);
        Ok(opened)
    }
}

fn increment(nonce: &mut [u8; NONCE_LEN]) {
    for byte in nonce.iter_mut() {
        let (next, overflow) = byte.overflowing_add(1);
        *byte = next;
        if !overflow {
            break;
        }
    }
}

fn random_salt(len: usize) -> Vec<u8> {
    let mut salt = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

pub struct AeadStage {
    params: Arc<AeadParams>,
    kind: TransportKind,
    encoder: Option<Session>,
    decoder: Option<Session>,
    inbound: BytesMut,
    /// Decrypted length of the chunk whose payload is awaited.
    pending_len: Option<usize>,
}

impl AeadStage {
    pub fn new(params: Arc<AeadParams>, kind: TransportKind) -> Self {
        Self {
            params,
            kind,
            encoder: None,
            decoder: None,
            inbound: BytesMut::new(),
            pending_len: None,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn seal_stream(&mut self, data: &[u8]) -> Result<Bytes, StageError> {
        let salt_len = self.params.method.salt_len();
        let frames = data.len().div_ceil(MAX_CHUNK);
        let mut buf = BytesMut::with_capacity(salt_len + data.len() + frames * (2 + 2 * TAG_LEN));

        if self.encoder.is_none() {
            let salt = random_salt(salt_len);
            buf.extend_from_slice(&salt);
            self.encoder = Some(Session::new(self.params.subkey(&salt)?));
        }
        let Some(session) = self.encoder.as_mut() else {
            return Err(StageError::Crypto("encoder unavailable"));
        };

        for chunk in data.chunks(MAX_CHUNK) {
            buf.extend_from_slice(&session.seal_next(&(chunk.len() as u16).to_be_bytes())?);
            buf.extend_from_slice(&session.seal_next(chunk)?);
        }
        Ok(buf.freeze())
    }

    fn open_stream(&mut self, data: &[u8], out: &mut StageOutput) -> Result<(), StageError> {
        self.inbound.extend_from_slice(data);

        if self.decoder.is_none() {
            let salt_len = self.params.method.salt_len();
            if self.inbound.len() < salt_len {
                return Ok(());
            }
            let salt = self.inbound.split_to(salt_len);
            self.decoder = Some(Session::new(self.params.subkey(&salt)?));
        }
        let Some(session) = self.decoder.as_mut() else {
            return Ok(());
        };

        loop {
            match self.pending_len {
                None => {
                    if self.inbound.len() < 2 + TAG_LEN {
                        return Ok(());
                    }
                    let sealed = self.inbound.split_to(2 + TAG_LEN);
                    let len = session.open_next(&sealed)?;
                    let len = u16::from_be_bytes([len[0], len[1]]) as usize;
                    if len > MAX_CHUNK {
                        return Err(StageError::FrameTooLarge(len));
                    }
                    self.pending_len = Some(len);
                }
                Some(len) => {
                    if self.inbound.len() < len + TAG_LEN {
                        return Ok(());
                    }
                    let sealed = self.inbound.split_to(len + TAG_LEN);
                    out.push(Bytes::from(session.open_next(&sealed)?));
                    self.pending_len = None;
                }
            }
        }
    }

    fn seal_datagram(&self, data: &[u8]) -> Result<Bytes, StageError> {
        let salt = random_salt(self.params.method.salt_len());
        let sealed = self.params.subkey(&salt)?.seal(&[0u8; NONCE_LEN], data)?;
        let mut buf = BytesMut::with_capacity(salt.len() + sealed.len());
        buf.put_slice(&salt);
        buf.put_slice(&sealed);
        Ok(buf.freeze())
    }

    fn open_datagram(&self, mut data: Bytes) -> Result<Bytes, StageError> {
        let salt_len = self.params.method.salt_len();
        if data.len() < salt_len + TAG_LEN {
            return Err(StageError::Malformed("datagram too short".into()));
        }
        let salt = data.split_to(salt_len);
        let opened = self.params.subkey(&salt)?.open(&[0u8; NONCE_LEN], &data)?;
        Ok(Bytes::from(opened))
    }
}

impl Stage for AeadStage {
    fn name(&self) -> &'static str {
        NAME
    }

    fn upward(&mut self, data: Bytes, out: &mut StageOutput) -> Result<(), StageError> {
        let sealed = match self.kind {
            TransportKind::Tcp => self.seal_stream(&data)?,
            TransportKind::Udp => self.seal_datagram(&data)?,
        };
        out.push(sealed);
        Ok(())
    }

    fn downward(&mut self, data: Bytes, out: &mut StageOutput) -> Result<(), StageError> {
        match self.kind {
            TransportKind::Tcp => self.open_stream(&data, out),
            TransportKind::Udp => {
                out.push(self.open_datagram(data)?);
                Ok(())
            }
        }
    }
}
