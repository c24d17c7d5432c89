use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, InvalidLength, KeyIvInit};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::playlist::Segment;
use super::progress::{Phase, Progress};
use super::segment::temp_path;
use crate::error::{ExtractError, Result};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const BLOCK_SIZE: usize = 16;

/// Decrypts `buffer` in place with AES-CBC and returns it.
///
/// The whole buffer is decrypted and no padding is stripped. The key length
/// picks AES-128, AES-192 or AES-256.
pub fn decrypt_in_place<'a>(buffer: &'a mut [u8], key: &[u8], iv: &[u8]) -> Result<&'a [u8]> {
    if buffer.len() < BLOCK_SIZE {
        return Err(ExtractError::Crypto(format!(
            "ciphertext of {} bytes is shorter than one block",
            buffer.len()
        )));
    }
    if buffer.len() % BLOCK_SIZE != 0 {
        return Err(ExtractError::Crypto(format!(
            "ciphertext of {} bytes is not a multiple of the block size",
            buffer.len()
        )));
    }

    let invalid = |err: InvalidLength| ExtractError::Crypto(format!("cannot initialize AES-CBC: {err}"));
    let decrypted = match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(invalid)?
            .decrypt_padded_mut::<NoPadding>(buffer),
        24 => Aes192CbcDec::new_from_slices(key, iv)
            .map_err(invalid)?
            .decrypt_padded_mut::<NoPadding>(buffer),
        32 => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(invalid)?
            .decrypt_padded_mut::<NoPadding>(buffer),
        len => {
            return Err(ExtractError::Crypto(format!(
                "AES key must be 16, 24 or 32 bytes, got {len}"
            )))
        }
    };

    decrypted.map_err(|err| ExtractError::Crypto(format!("AES-CBC decryption failed: {err}")))
}

/// Writes downloaded segments to the output file in playlist order.
pub struct StreamAssembler {
    dir: PathBuf,
    skip_missing: bool,
    progress: Progress,
}

impl StreamAssembler {
    pub fn new(dir: PathBuf, skip_missing: bool, progress: Progress) -> Self {
        Self {
            dir,
            skip_missing,
            progress,
        }
    }

    /// Decrypts and appends every segment to `output`, removing each
    /// temporary file once it is no longer needed. Returns the bytes written.
    ///
    /// The first read, decrypt or write error stops the assembly and leaves
    /// the partially written output in place.
    pub async fn assemble(&self, segments: &[Segment], output: &Path) -> Result<u64> {
        let mut ordered = segments.iter().collect::<Vec<_>>();
        ordered.sort_by_key(|segment| segment.ordinal);

        // a URL listed twice shares one temporary file
        let last_use = ordered
            .iter()
            .enumerate()
            .map(|(index, segment)| (temp_path(&self.dir, &segment.uri), index))
            .collect::<HashMap<_, _>>();

        let mut file = tokio::fs::File::create(output)
            .await
            .map_err(|err| ExtractError::io(output, err))?;

        let total = ordered.len();
        let mut written = 0u64;

        info!(total, output = %output.display(), "assembling segments");

        for (index, segment) in ordered.into_iter().enumerate() {
            let path = temp_path(&self.dir, &segment.uri);

            let mut bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == ErrorKind::NotFound && self.skip_missing => {
                    warn!(segment = %segment.uri, "segment missing, skipping it");
                    self.progress.emit(Phase::Assemble, segment.name(), index + 1, total);
                    continue;
                }
                Err(err) => return Err(ExtractError::io(&path, err)),
            };

            let data = match (&segment.key, &segment.iv) {
                (Some(key), Some(iv)) => decrypt_in_place(&mut bytes, key, iv)?,
                (Some(_), None) => {
                    return Err(ExtractError::Crypto(format!(
                        "segment {} has a key but no IV",
                        segment.uri
                    )))
                }
                (None, _) => &bytes[..],
            };

            file.write_all(data)
                .await
                .map_err(|err| ExtractError::io(output, err))?;
            written += data.len() as u64;

            if last_use.get(&path) == Some(&index) {
                if let Err(err) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), "cannot remove temporary segment: {}", err);
                }
            }

            debug!(segment = segment.name(), ordinal = segment.ordinal, len = data.len(), "appended");
            self.progress.emit(Phase::Assemble, segment.name(), index + 1, total);
        }

        file.flush().await.map_err(|err| ExtractError::io(output, err))?;
        info!(bytes = written, output = %output.display(), "assembly finished");

        Ok(written)
    }
}
