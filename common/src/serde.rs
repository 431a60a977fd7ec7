use std::io::Write;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::file_format::SerdeFormat;

#[derive(Debug, thiserror::Error)]
pub enum SerdeError {
    #[error("YAML serialization failed: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TOML serialization failed: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("TOML deserialization failed: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("binary encoding failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("binary decoding failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("lz4 decompression failed: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),
    #[error("text payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("binary payload has {0} trailing bytes")]
    TrailingBytes(usize),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SerdeError>;

pub fn serialize<T: Serialize>(value: &T, format: SerdeFormat) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut temp_buffer = Vec::new();
    serialize_into(value, format, &mut buffer, &mut temp_buffer)?;
    Ok(buffer)
}

/// Serializes `value` into `writer`.
///
/// `temp_buffer` is scratch space reused across calls for the binary format.
pub fn serialize_into<T: Serialize, W: Write>(
    value: &T,
    format: SerdeFormat,
    writer: &mut W,
    temp_buffer: &mut Vec<u8>,
) -> Result<()> {
    temp_buffer.clear();

    match format {
        SerdeFormat::Yaml => writer.write_all(serde_yml::to_string(value)?.as_bytes())?,
        SerdeFormat::Json => writer.write_all(serde_json::to_string_pretty(value)?.as_bytes())?,
        SerdeFormat::Toml => writer.write_all(toml::to_string(value)?.as_bytes())?,
        SerdeFormat::Bin => {
            bincode::serde::encode_into_std_write(value, temp_buffer, bincode::config::standard())?;
            let compressed = lz4_flex::compress_prepend_size(temp_buffer);
            writer.write_all(&compressed)?;
        }
    }

    Ok(())
}

pub fn deserialize<T: DeserializeOwned>(serialized: &[u8], format: SerdeFormat) -> Result<T> {
    match format {
        SerdeFormat::Yaml => Ok(serde_yml::from_str(std::str::from_utf8(serialized)?)?),
        SerdeFormat::Json => Ok(serde_json::from_str(std::str::from_utf8(serialized)?)?),
        SerdeFormat::Toml => Ok(toml::from_str(std::str::from_utf8(serialized)?)?),
        SerdeFormat::Bin => {
            let decompressed = lz4_flex::decompress_size_prepended(serialized)?;
            let (decoded, read) =
                bincode::serde::decode_from_slice(&decompressed, bincode::config::standard())?;
            if read != decompressed.len() {
                return Err(SerdeError::TrailingBytes(decompressed.len() - read));
            }
            Ok(decoded)
        }
    }
}
