use std::sync::OnceLock;

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use regex::bytes::Regex;
use tracing::warn;

/// Encoding of a document on disk, kept so the file is written back the way it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextEncoding {
    pub encoding: &'static Encoding,
    pub bom: bool,
}

impl Default for TextEncoding {
    fn default() -> Self {
        TextEncoding {
            encoding: UTF_8,
            bom: false,
        }
    }
}

impl TextEncoding {
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }
}

#[derive(Debug)]
pub struct DecodedText {
    pub text: String,
    pub encoding: TextEncoding,
}

pub fn decode(bytes: &[u8]) -> DecodedText {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return DecodedText {
            text: text.into_owned(),
            encoding: TextEncoding {
                encoding,
                bom: true,
            },
        };
    }

    let declared = declared_encoding(bytes).unwrap_or(UTF_8);
    let (text, had_errors) = declared.decode_without_bom_handling(bytes);

    if !had_errors {
        return DecodedText {
            text: text.into_owned(),
            encoding: TextEncoding {
                encoding: declared,
                bom: false,
            },
        };
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let guessed = detector.guess(None, true);

    warn!(
        declared = declared.name(),
        guessed = guessed.name(),
        "document is not valid in its declared encoding, using detected encoding"
    );

    let (text, _) = guessed.decode_without_bom_handling(bytes);
    DecodedText {
        text: text.into_owned(),
        encoding: TextEncoding {
            encoding: guessed,
            bom: false,
        },
    }
}

pub fn encode(text: &str, encoding: TextEncoding) -> Vec<u8> {
    let enc = encoding.encoding;

    // encoding_rs only decodes UTF-16; encoding it is done by hand.
    if enc == UTF_16LE || enc == UTF_16BE {
        let little = enc == UTF_16LE;
        let mut out = Vec::with_capacity(text.len() * 2 + 2);
        if encoding.bom {
            let bom: [u8; 2] = if little { [0xFF, 0xFE] } else { [0xFE, 0xFF] };
            out.extend_from_slice(&bom);
        }
        for unit in text.encode_utf16() {
            let bytes = if little {
                unit.to_le_bytes()
            } else {
                unit.to_be_bytes()
            };
            out.extend_from_slice(&bytes);
        }
        return out;
    }

    let (bytes, _, _) = enc.encode(text);

    let mut out = Vec::with_capacity(bytes.len() + 3);
    if encoding.bom && enc == UTF_8 {
        out.extend_from_slice(&[0xEF, 0xBB, 0xBF]);
    }
    out.extend_from_slice(&bytes);
    out
}

/// Reads `encoding="..."` from the XML declaration. A UTF-16 label without a
/// BOM can only have been read as ASCII, so it is treated as UTF-8.
fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"^\s*<\?xml[^>]*?encoding\s*=\s*["']([A-Za-z0-9._:-]+)["']"#)
            .expect("declaration pattern is valid")
    });

    let head = &bytes[..bytes.len().min(256)];
    let label = re.captures(head)?.get(1)?.as_bytes();
    let encoding = Encoding::for_label(label)?;

    if encoding == UTF_16LE || encoding == UTF_16BE {
        Some(UTF_8)
    } else {
        Some(encoding)
    }
}
