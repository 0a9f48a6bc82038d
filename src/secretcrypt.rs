//! Encryption/decryption using scrypt + XSalsa20Poly1305
//!
//! This module implements password-based encryption using:
//! - scrypt for key derivation from the password
//! - NaCl secretbox (XSalsa20Poly1305) for authenticated encryption
//!
//! The binary format (layout version 1) is:
//! - kdf log_n: 1 byte
//! - kdf r: 4 bytes (big-endian u32)
//! - kdf p: 4 bytes (big-endian u32)
//! - salt: 16 bytes
//! - nonce: 24 bytes
//! - length: 8 bytes (big-endian signed int64)
//! - sealed box: variable length (includes 16-byte Poly1305 MAC)
//!
//! The sealed box does not hold the plaintext directly but a frame: a
//! big-endian u32 plaintext length, the plaintext, then zero bytes up to the
//! next multiple of [`PAD_BLOCK`]. Only the padded size is visible outside.

use crate::error::{ErrorCategory, ErrorKind, Result, VaultError};
use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::{Nonce, XSalsa20Poly1305};
use rand::RngCore;
use rand::rngs::OsRng;
use scrypt::{Params, scrypt};
use std::mem::size_of;
use zeroize::Zeroizing;

/// Length of salt in bytes
pub const SALT_LEN: usize = 16;

/// Length of nonce in bytes
pub const NONCE_LEN: usize = 24;

/// Length of derived key in bytes
const KEY_LEN: usize = 32;

/// Length of the serialized [`KdfParams`]
const KDF_HEADER_LEN: usize = 1 + 4 + 4;

/// Plaintext frames are padded to a multiple of this many bytes
pub const PAD_BLOCK: usize = 64;

const FRAME_PREFIX_LEN: usize = size_of::<u32>();

/// Upper bounds on KDF parameters read back from a blob. A stored blob is
/// untrusted input and must not be able to request unbounded work.
pub const MAX_LOG_N: u8 = 18;
const MAX_R: u32 = 16;
const MAX_P: u32 = 4;
const MAX_KDF_MEMORY: u64 = 256 * 1024 * 1024;

/// Lowest scrypt cost accepted for new seals. Blobs sealed at a higher
/// cost still open; this only gates sealing.
pub const MIN_SEAL_LOG_N: u8 = 15;
pub const MIN_SEAL_R: u32 = 8;

/// scrypt cost parameters, stored in every blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// log2 of the CPU/memory cost N
    pub log_n: u8,
    /// block size
    pub r: u32,
    /// parallelization
    pub p: u32,
}

impl KdfParams {
    /// N = 32768, r = 8, p = 1
    pub const DEFAULT: KdfParams = KdfParams {
        log_n: 15,
        r: 8,
        p: 1,
    };

    pub fn new(log_n: u8, r: u32, p: u32) -> Result<Self> {
        let params = Self { log_n, r, p };
        if !params.within_bounds() {
            return Err(VaultError::invalid_input(
                ErrorKind::BinaryFormat,
                format!(
                    "unsupported scrypt parameters (log_n={}, r={}, p={})",
                    log_n, r, p
                ),
            ));
        }
        Ok(params)
    }

    /// True when the parameters are at least as costly as
    /// [`MIN_SEAL_LOG_N`] and [`MIN_SEAL_R`].
    pub fn meets_seal_floor(&self) -> bool {
        self.log_n >= MIN_SEAL_LOG_N && self.r >= MIN_SEAL_R
    }

    /// Reject parameters too cheap to seal new data with.
    ///
    /// Unit tests of this crate seal with cheap parameters, so the floor is
    /// only enforced outside `cfg(test)`.
    pub fn ensure_seal_strength(&self) -> Result<()> {
        if cfg!(test) || self.meets_seal_floor() {
            return Ok(());
        }
        Err(VaultError::invalid_input(
            ErrorKind::WeakKdf,
            format!(
                "scrypt parameters too weak for sealing (log_n={}, r={}; need log_n >= {}, r >= {})",
                self.log_n, self.r, MIN_SEAL_LOG_N, MIN_SEAL_R
            ),
        ))
    }

    fn within_bounds(&self) -> bool {
        if self.log_n == 0 || self.log_n > MAX_LOG_N {
            return false;
        }
        if self.r == 0 || self.r > MAX_R || self.p == 0 || self.p > MAX_P {
            return false;
        }
        // scrypt rejects log_n >= 16 * r
        if u32::from(self.log_n) >= self.r * 16 {
            return false;
        }
        128 * u64::from(self.r) * (1u64 << self.log_n) <= MAX_KDF_MEMORY
    }

    fn to_bytes(self) -> [u8; KDF_HEADER_LEN] {
        let mut out = [0u8; KDF_HEADER_LEN];
        out[0] = self.log_n;
        out[1..5].copy_from_slice(&self.r.to_be_bytes());
        out[5..9].copy_from_slice(&self.p.to_be_bytes());
        out
    }

    fn from_bytes(bytes: &[u8; KDF_HEADER_LEN]) -> Option<Self> {
        let params = Self {
            log_n: bytes[0],
            r: u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
            p: u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]),
        };
        params.within_bounds().then_some(params)
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Derive a 32-byte key from a password and salt using scrypt
fn derive_key(
    password: &[u8],
    salt: &[u8; SALT_LEN],
    kdf: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let params = Params::new(kdf.log_n, kdf.r, kdf.p, KEY_LEN).map_err(|e| {
        VaultError::with_kind(
            ErrorCategory::EngineFault,
            ErrorKind::ScryptFailure,
            format!("failed to create scrypt params: {}", e),
        )
    })?;

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    scrypt(password, salt, &params, &mut key[..]).map_err(|e| {
        VaultError::with_kind(
            ErrorCategory::EngineFault,
            ErrorKind::ScryptFailure,
            format!("scrypt key derivation failed: {}", e),
        )
    })?;

    Ok(key)
}

/// Spend one key derivation at `kdf` cost and throw the result away.
///
/// Decryption paths that reject input before reaching the real derivation
/// call this so that every failure costs roughly the same.
pub(crate) fn burn_key_derivation(password: &[u8], kdf: &KdfParams) {
    let _ = derive_key(password, &[0u8; SALT_LEN], kdf);
}

fn cipher_for(key: &[u8; KEY_LEN]) -> Result<XSalsa20Poly1305> {
    XSalsa20Poly1305::new_from_slice(&key[..]).map_err(|e| {
        VaultError::with_kind(
            ErrorCategory::EngineFault,
            ErrorKind::SecretboxFailure,
            format!("failed to initialize secretbox: {}", e),
        )
    })
}

fn fill_random(buf: &mut [u8]) -> Result<()> {
    OsRng.try_fill_bytes(buf).map_err(|e| {
        VaultError::with_kind_and_source(
            ErrorCategory::EngineFault,
            ErrorKind::EntropyUnavailable,
            "system entropy source unavailable",
            e,
        )
    })
}

fn frame(plaintext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let len = u32::try_from(plaintext.len()).map_err(|_| {
        VaultError::invalid_input(ErrorKind::BinaryFormat, "plaintext too large to seal")
    })?;
    let framed_len = (FRAME_PREFIX_LEN + plaintext.len()).div_ceil(PAD_BLOCK) * PAD_BLOCK;

    let mut framed = Zeroizing::new(Vec::with_capacity(framed_len));
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(plaintext);
    framed.resize(framed_len, 0);
    Ok(framed)
}

/// Recover the plaintext from an authenticated frame, insisting on the exact
/// padding `frame` produces.
fn unframe(framed: &[u8]) -> Option<&[u8]> {
    if framed.len() < PAD_BLOCK || framed.len() % PAD_BLOCK != 0 {
        return None;
    }
    let (prefix, rest) = framed.split_at(FRAME_PREFIX_LEN);
    let len = u32::from_be_bytes(prefix.try_into().ok()?) as usize;
    if len > rest.len() {
        return None;
    }
    if (FRAME_PREFIX_LEN + len).div_ceil(PAD_BLOCK) * PAD_BLOCK != framed.len() {
        return None;
    }
    let (plaintext, padding) = rest.split_at(len);
    padding.iter().all(|&b| b == 0).then_some(plaintext)
}

/// Encrypt plaintext with a password using random salt and nonce
///
/// Returns the binary format: kdf(9) + salt(16) + nonce(24) + length(8) + sealedbox(variable)
pub fn encrypt(password: &[u8], plaintext: &[u8], kdf: &KdfParams) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    fill_random(&mut salt)?;

    let mut nonce = [0u8; NONCE_LEN];
    fill_random(&mut nonce)?;

    encrypt_deterministic(password, plaintext, kdf, &salt, &nonce)
}

/// Encrypt plaintext with a password using provided salt and nonce
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `encrypt()` which generates random salt/nonce.
pub fn encrypt_deterministic(
    password: &[u8],
    plaintext: &[u8],
    kdf: &KdfParams,
    salt: &[u8; SALT_LEN],
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>> {
    let kdf = KdfParams::new(kdf.log_n, kdf.r, kdf.p)?;
    kdf.ensure_seal_strength()?;
    let key = derive_key(password, salt, &kdf)?;
    let cipher = cipher_for(&key)?;

    let framed = frame(plaintext)?;
    let nonce_obj = Nonce::from(*nonce);
    let sealed_box = cipher
        .encrypt(&nonce_obj, framed.as_slice())
        .map_err(|e| {
            VaultError::with_kind(
                ErrorCategory::EngineFault,
                ErrorKind::SecretboxFailure,
                format!("encryption failed: {}", e),
            )
        })?;

    let sealed_box_len = sealed_box.len() as i64;
    let mut output = Vec::with_capacity(
        KDF_HEADER_LEN + SALT_LEN + NONCE_LEN + size_of::<i64>() + sealed_box.len(),
    );
    output.extend_from_slice(&kdf.to_bytes());
    output.extend_from_slice(salt);
    output.extend_from_slice(nonce);
    output.extend_from_slice(&sealed_box_len.to_be_bytes()); // big-endian i64
    output.extend_from_slice(&sealed_box);

    Ok(output)
}

/// The pieces of a layout-version-1 body.
struct Envelope<'a> {
    kdf: KdfParams,
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
    sealed_box: &'a [u8],
}

fn malformed(kind: ErrorKind, msg: &str) -> VaultError {
    VaultError::with_kind(ErrorCategory::WrongKey, kind, msg)
}

fn parse(ciphertext: &[u8]) -> Result<Envelope<'_>> {
    let mut pos = 0;

    if ciphertext.len() < pos + KDF_HEADER_LEN {
        return Err(malformed(
            ErrorKind::TruncatedInput,
            "input likely truncated while reading kdf parameters",
        ));
    }
    let header: [u8; KDF_HEADER_LEN] = ciphertext[pos..pos + KDF_HEADER_LEN]
        .try_into()
        .map_err(|_| malformed(ErrorKind::TruncatedInput, "failed to read kdf parameters"))?;
    let kdf = KdfParams::from_bytes(&header).ok_or_else(|| {
        malformed(
            ErrorKind::BinaryFormat,
            "kdf parameters out of supported range",
        )
    })?;
    pos += KDF_HEADER_LEN;

    if ciphertext.len() < pos + SALT_LEN {
        return Err(malformed(
            ErrorKind::TruncatedInput,
            "input likely truncated while reading salt",
        ));
    }
    let salt: [u8; SALT_LEN] = ciphertext[pos..pos + SALT_LEN]
        .try_into()
        .map_err(|_| malformed(ErrorKind::TruncatedInput, "failed to read salt"))?;
    pos += SALT_LEN;

    if ciphertext.len() < pos + NONCE_LEN {
        return Err(malformed(
            ErrorKind::TruncatedInput,
            "input likely truncated while reading nonce",
        ));
    }
    let nonce: [u8; NONCE_LEN] = ciphertext[pos..pos + NONCE_LEN]
        .try_into()
        .map_err(|_| malformed(ErrorKind::TruncatedInput, "failed to read nonce"))?;
    pos += NONCE_LEN;

    if ciphertext.len() < pos + size_of::<i64>() {
        return Err(malformed(
            ErrorKind::TruncatedInput,
            "input likely truncated while reading sealed box",
        ));
    }
    let length_bytes: [u8; 8] = ciphertext[pos..pos + size_of::<i64>()]
        .try_into()
        .map_err(|_| malformed(ErrorKind::TruncatedInput, "failed to read length"))?;
    let sealed_box_len = i64::from_be_bytes(length_bytes);
    pos += size_of::<i64>();

    if sealed_box_len < 0 {
        return Err(malformed(
            ErrorKind::BinaryFormat,
            "negative sealed box length (when interpreted as a big-endian i64)",
        ));
    }

    // *Valid* input can fail this check if the platform's isize is small.
    if sealed_box_len > isize::MAX as i64 {
        return Err(malformed(
            ErrorKind::BinaryFormat,
            "sealed box length exceeds this system's max isize",
        ));
    }

    let sealed_box_len = sealed_box_len as usize;

    if ciphertext.len() < pos + sealed_box_len {
        return Err(malformed(
            ErrorKind::TruncatedInput,
            "truncated or corrupt input; claimed length greater than available input",
        ));
    }
    let sealed_box = &ciphertext[pos..pos + sealed_box_len];
    pos += sealed_box_len;

    if pos < ciphertext.len() {
        return Err(malformed(
            ErrorKind::TrailingData,
            "invalid input: unexpected data after sealed box",
        ));
    }

    Ok(Envelope {
        kdf,
        salt,
        nonce,
        sealed_box,
    })
}

/// Decrypt ciphertext with a password
///
/// Every rejection other than an engine fault carries
/// [`ErrorCategory::WrongKey`]; the kind says why, for logs and tests only.
/// Input too malformed to reach key derivation still pays for one
/// derivation at `rejection_cost`.
pub fn decrypt(
    password: &[u8],
    ciphertext: &[u8],
    rejection_cost: &KdfParams,
) -> Result<Zeroizing<Vec<u8>>> {
    let envelope = match parse(ciphertext) {
        Ok(envelope) => envelope,
        Err(e) => {
            burn_key_derivation(password, rejection_cost);
            return Err(e);
        }
    };

    let key = derive_key(password, &envelope.salt, &envelope.kdf)?;
    let cipher = cipher_for(&key)?;
    let nonce_obj = Nonce::from(envelope.nonce);
    let framed = cipher
        .decrypt(&nonce_obj, envelope.sealed_box)
        .map(Zeroizing::new)
        .map_err(|_| {
            malformed(
                ErrorKind::AuthenticationFailed,
                "corrupt input, tampered-with data, or bad password",
            )
        })?;

    let plaintext = unframe(&framed).ok_or_else(|| {
        malformed(
            ErrorKind::BinaryFormat,
            "authenticated payload has an invalid frame",
        )
    })?;

    Ok(Zeroizing::new(plaintext.to_vec()))
}
