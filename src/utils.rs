use crate::errors::{AppError, Result};
use log::info;

/// Sanitizes a filename by replacing characters that are illegal on common
/// filesystems, then trimming leading/trailing dots and whitespace.
pub fn sanitize_filename(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let sanitized = sanitized.trim_matches(|c: char| c == '.' || c.is_whitespace());

    if sanitized.chars().count() > 200 {
        sanitized.chars().take(200).collect()
    } else {
        sanitized.to_string()
    }
}

/// Number of decimal digits in `count`, used as the zero-pad width for
/// numeric file prefixes. `count` of 0 or 1..=9 gives 1, 10..=99 gives 2, etc.
pub fn int_width(count: usize) -> usize {
    let mut width = 1;
    let mut n = count / 10;
    while n > 0 {
        width += 1;
        n /= 10;
    }
    width
}

/// Formats a duration in seconds as `mm:ss`.
pub fn format_duration(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Creates a directory if it doesn't exist
pub async fn ensure_dir_exists(path: &std::path::Path) -> Result<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path).await?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}

/// Generates a unique ID for download tasks
pub fn generate_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

const NONCE_LEN: usize = 12;

/// Encrypts sensitive data using AES-GCM with a random nonce prepended to
/// the ciphertext.
pub fn encrypt_data(data: &str, key: &[u8]) -> Result<String> {
    use aes_gcm::aead::Aead;
    use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
    use rand::RngCore;

    let key = Key::<Aes256Gcm>::from_slice(key);
    let cipher = Aes256Gcm::new(key);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, data.as_bytes())
        .map_err(|e| AppError::Encryption(format!("Encryption failed: {}", e)))?;

    let mut payload = nonce_bytes.to_vec();
    payload.extend_from_slice(&ciphertext);
    Ok(hex::encode(payload))
}

/// Decrypts data produced by [`encrypt_data`].
pub fn decrypt_data(encrypted_data: &str, key: &[u8]) -> Result<String> {
    use aes_gcm::aead::Aead;
    use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};

    let payload = hex::decode(encrypted_data)
        .map_err(|e| AppError::Encryption(format!("Hex decoding failed: {}", e)))?;

    if payload.len() < NONCE_LEN {
        return Err(AppError::Encryption("Payload too short".to_string()));
    }

    let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
    let key = Key::<Aes256Gcm>::from_slice(key);
    let cipher = Aes256Gcm::new(key);

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| AppError::Encryption(format!("Decryption failed: {}", e)))?;

    String::from_utf8(plaintext)
        .map_err(|e| AppError::Encryption(format!("UTF-8 conversion failed: {}", e)))
}
