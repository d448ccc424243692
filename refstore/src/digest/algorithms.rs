//! Digest functions shared by sequences and collections.
//!
//! Sequence content is digested byte-for-byte, with no case folding or other
//! normalization. Collection digests are built from canonical JSON serializations
//! of the per-attribute arrays, following the GA4GH seqcol scheme.

use md5::Md5;
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha512};

/// Number of SHA-512 bytes kept by the sha512t24u digest.
const SHA512T24U_BYTES: usize = 24;

/// Computes the GA4GH sha512t24u digest of the input.
///
/// The input is hashed with SHA-512, the first 24 bytes are kept, and the result is
/// encoded with URL-safe base64 without padding, giving a 32-character string.
/// Accepts string slices or byte slices.
pub fn sha512t24u<T: AsRef<[u8]>>(input: T) -> String {
    let mut hasher = Sha512::new();
    hasher.update(input.as_ref());
    base64_url::encode(&hasher.finalize()[..SHA512T24U_BYTES])
}

/// Lowercase hex MD5 of the input.
pub fn md5<T: AsRef<[u8]>>(input: T) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_ref());
    format!("{:x}", hasher.finalize())
}

/// Incremental digester computing sha512t24u and md5 over a stream of chunks.
///
/// Used by the FASTA parser, which sees a sequence one line at a time.
#[derive(Clone, Default)]
pub struct StreamingDigester {
    sha512: Sha512,
    md5: Md5,
}

impl StreamingDigester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.sha512.update(chunk);
        self.md5.update(chunk);
    }

    /// Returns `(sha512t24u, md5)`.
    pub fn finalize(self) -> (String, String) {
        let sha = self.sha512.finalize();
        (
            base64_url::encode(&sha[..SHA512T24U_BYTES]),
            format!("{:x}", self.md5.finalize()),
        )
    }
}

/// Apply RFC-8785 JSON Canonicalization Scheme (JCS) to a JSON value
///
/// Object keys are sorted, insignificant whitespace is removed and integers are
/// written without exponent or fraction. Strings use standard JSON escaping.
pub fn canonicalize_json(value: &Value) -> String {
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => value.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{:.0}", f),
                    _ => n.to_string(),
                }
            }
        }
        Value::Array(items) => {
            let elements: Vec<String> = items.iter().map(canonicalize_json).collect();
            format!("[{}]", elements.join(","))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let pairs: Vec<String> = keys
                .into_iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        Value::String(key.clone()),
                        canonicalize_json(&map[key])
                    )
                })
                .collect();
            format!("{{{}}}", pairs.join(","))
        }
    }
}

/// Level-1 digest of one collection attribute: sha512t24u of the canonical JSON
/// array of its values, in collection order.
pub fn level1_digest<T: Serialize>(values: &[T]) -> String {
    // Strings and integers always serialize; anything else degrades to null.
    let array = serde_json::to_value(values).unwrap_or(Value::Null);
    sha512t24u(canonicalize_json(&array))
}

/// Top-level collection digest.
///
/// Only the inherent attributes (`names` and `sequences`) participate; lengths
/// are implied by the sequences and are excluded.
pub fn collection_digest(names_digest: &str, sequences_digest: &str) -> String {
    let object = json!({
        "names": names_digest,
        "sequences": sequences_digest,
    });
    sha512t24u(canonicalize_json(&object))
}

/// The value a sequence contributes to the `sequences` level-1 array.
pub fn refget_sequence_id(sha512t24u: &str) -> String {
    format!("SQ.{}", sha512t24u)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[rstest]
    #[case(b"hello world".as_slice(), "MJ7MSJwS1utMxA9QyQLytNDtd-5RGnx6")]
    #[case(b"TTGGGGAA".as_slice(), "iYtREV555dUFKg2_agSJW6suquUyPpMw")]
    #[case(b"ACGT".as_slice(), "aKF498dAxcJAqme6QYQ7EZ07-fiw8Kw2")]
    #[case(b"".as_slice(), "z4PhNX7vuL3xVChQ1m2AB9Yg5AULVxXc")]
    fn test_sha512t24u(#[case] input: &[u8], #[case] expected: &str) {
        assert_eq!(sha512t24u(input), expected);
    }

    #[rstest]
    fn test_digest_is_case_sensitive() {
        assert_eq!(sha512t24u("acgt"), "eFwawHHdibaZBDcs9kW3gm31h1NNJcQe");
        assert_ne!(sha512t24u("acgt"), sha512t24u("ACGT"));
    }

    #[rstest]
    fn test_md5() {
        assert_eq!(md5("hello world"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(md5(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5("TTGGGGAA"), "5f63cfaa3ef61f88c9635fb9d18ec945");
    }

    #[rstest]
    fn test_streaming_digester_matches_one_shot() {
        let mut digester = StreamingDigester::new();
        digester.update(b"TTGG");
        digester.update(b"");
        digester.update(b"GGAA");
        let (sha, md5_digest) = digester.finalize();
        assert_eq!(sha, sha512t24u("TTGGGGAA"));
        assert_eq!(md5_digest, md5("TTGGGGAA"));
    }

    #[rstest]
    fn test_canonicalize_json_sorts_keys_and_strips_whitespace() {
        let value: Value =
            serde_json::from_str(r#"{ "b": [1, 2, "x"], "a": {"z": null, "y": true} }"#).unwrap();
        assert_eq!(
            canonicalize_json(&value),
            r#"{"a":{"y":true,"z":null},"b":[1,2,"x"]}"#
        );
    }

    #[rstest]
    fn test_canonicalize_json_escapes_strings() {
        let value = json!(["tab\there", "quote\""]);
        assert_eq!(canonicalize_json(&value), r#"["tab\there","quote\""]"#);
    }

    #[rstest]
    fn test_level1_and_collection_digests() {
        let names = level1_digest(&["chr1", "chr2"]);
        let lengths = level1_digest(&[12usize, 8]);
        let sequences = level1_digest(&[
            refget_sequence_id(&sha512t24u("ATGCATGCATGC")),
            refget_sequence_id(&sha512t24u("GGGGAAAA")),
        ]);
        assert_eq!(names, "XEsH8IMZ09CBX17iXEWRagH50VGfARLo");
        assert_eq!(lengths, "LTj30j1EGVtJaNpCOPqpLxDWcyiS7ST3");
        assert_eq!(sequences, "jcwpETYSazHnFtNE9omV4S8ob-_3eYAg");
        assert_eq!(
            collection_digest(&names, &sequences),
            "uC_UorBNf3YUu1YIDainBhI94CedlNeH"
        );
    }
}
