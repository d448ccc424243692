use super::alphabet::{self, Alphabet, AlphabetType};

/// A struct for encoding biological sequences into a compact, bit-packed format.
///
/// Symbols are packed MSB-first: the first symbol occupies the highest bits of the
/// first byte. The last byte is zero-padded.
///
/// # Usage
///
/// 1. Create a new `SequenceEncoder` using the `new` method.
/// 2. Add sequence chunks with the `update` method.
/// 3. Call the `finalize` method to retrieve the encoded sequence as a `Vec<u8>`.
///
pub struct SequenceEncoder {
    alphabet: &'static Alphabet,
    encoded_sequence: Vec<u8>,
    buffer: u64,        // pending bits, right-aligned
    buffer_bits: usize, // number of valid bits in buffer
}

impl SequenceEncoder {
    pub fn new(alphabet_type: AlphabetType, length: usize) -> Self {
        let alphabet = alphabet::lookup_alphabet(&alphabet_type);

        SequenceEncoder {
            alphabet,
            encoded_sequence: Vec::with_capacity(encoded_size(length, alphabet)),
            buffer: 0,
            buffer_bits: 0,
        }
    }

    pub fn update(&mut self, sequence: &[u8]) {
        if self.alphabet.bits_per_symbol == 8 {
            self.encoded_sequence.extend_from_slice(sequence);
            return;
        }

        for &byte in sequence {
            let code = self.alphabet.encoding_array[byte as usize] as u64;
            self.buffer = (self.buffer << self.alphabet.bits_per_symbol) | code;
            self.buffer_bits += self.alphabet.bits_per_symbol;

            while self.buffer_bits >= 8 {
                self.buffer_bits -= 8;
                self.encoded_sequence.push((self.buffer >> self.buffer_bits) as u8);
                self.buffer &= (1 << self.buffer_bits) - 1;
            }
        }
    }

    pub fn finalize(mut self) -> Vec<u8> {
        if self.buffer_bits > 0 {
            let out_byte = (self.buffer << (8 - self.buffer_bits)) as u8;
            self.encoded_sequence.push(out_byte);
        }
        self.encoded_sequence
    }
}

/// Number of bytes needed to hold `length` symbols of `alphabet`.
pub fn encoded_size(length: usize, alphabet: &Alphabet) -> usize {
    (length * alphabet.bits_per_symbol).div_ceil(8)
}

/// Encodes a sequence into its bit-packed form.
///
/// **Bit Ordering: MSB-first**
///
/// Example with 2-bit DNA encoding (A=00, C=01, G=10, T=11):
/// - Sequence "ACGT" → byte 0x1B (00011011)
///
/// Bytes outside the alphabet are not representable; callers classify the sequence
/// first (see [`guess_alphabet`](super::alphabet::guess_alphabet)).
pub fn encode_sequence<T: AsRef<[u8]>>(sequence: T, alphabet: &Alphabet) -> Vec<u8> {
    let sequence = sequence.as_ref();
    let mut encoder = SequenceEncoder::new(alphabet.alphabet_type, sequence.len());
    encoder.update(sequence);
    encoder.finalize()
}

/// Extracts the code of the symbol at `index`.
///
/// A symbol of at most 8 bits never spans more than two bytes, so a 16-bit window
/// starting at the symbol's first byte always covers it.
#[inline]
fn code_at(encoded_bytes: &[u8], index: usize, bits_per_symbol: usize) -> u8 {
    let bit_pos = index * bits_per_symbol;
    let byte_index = bit_pos / 8;
    let high = encoded_bytes.get(byte_index).copied().unwrap_or(0) as u16;
    let low = encoded_bytes.get(byte_index + 1).copied().unwrap_or(0) as u16;
    let window = (high << 8) | low;
    let shift = 16 - (bit_pos % 8) - bits_per_symbol;
    let mask = (1u16 << bits_per_symbol) - 1;
    ((window >> shift) & mask) as u8
}

/// Decodes the symbols `[start, end)` from a bit-packed sequence.
///
/// Only the bytes covering the requested range are read; the bit offset of `start`
/// is computed directly, so ranges need not be byte-aligned.
///
/// # Arguments
///
/// * `encoded_bytes` - the bit-packed sequence
/// * `start` - first symbol, inclusive
/// * `end` - last symbol, exclusive
/// * `alphabet` - the alphabet the sequence was encoded with
pub fn decode_substring_from_bytes(
    encoded_bytes: &[u8],
    start: usize,
    end: usize,
    alphabet: &Alphabet,
) -> Vec<u8> {
    if end <= start {
        return Vec::new();
    }
    if alphabet.bits_per_symbol == 8 {
        let end = end.min(encoded_bytes.len());
        return encoded_bytes[start.min(end)..end].to_vec();
    }

    (start..end)
        .map(|i| alphabet.decoding_array[code_at(encoded_bytes, i, alphabet.bits_per_symbol) as usize])
        .collect()
}

/// Decodes a whole bit-packed sequence of `seq_len` symbols.
pub fn decode_string_from_bytes(
    encoded_bytes: &[u8],
    seq_len: usize,
    alphabet: &Alphabet,
) -> Vec<u8> {
    decode_substring_from_bytes(encoded_bytes, 0, seq_len, alphabet)
}
