use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// Represents an alphabet with its encoding and decoding arrays.
pub struct Alphabet {
    pub alphabet_type: AlphabetType,
    pub encoding_array: &'static [u8; 256],
    pub decoding_array: &'static [u8; 256],
    pub bits_per_symbol: usize,
}

/// A struct to guess alphabet types based on the sequence content.
///
/// This struct is meant to handle a sequence as a stream, so the FASTA parser can
/// classify a sequence line by line while it digests it.
pub struct AlphabetGuesser {
    alphabet_type: AlphabetType,
}

impl AlphabetGuesser {
    /// Creates a new AlphabetGuesser starting from the narrowest alphabet.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        AlphabetGuesser {
            alphabet_type: AlphabetType::Dna2bit,
        }
    }

    pub fn update(&mut self, sequence: &[u8]) {
        if self.alphabet_type == AlphabetType::Ascii {
            return;
        }

        for &byte in sequence {
            let required = get_minimum_alphabet_for_byte(byte);
            if required > self.alphabet_type {
                self.alphabet_type = required;
                if self.alphabet_type == AlphabetType::Ascii {
                    break;
                }
            }
        }
    }

    pub fn guess(&self) -> AlphabetType {
        self.alphabet_type
    }
}

/// Represents the type of alphabet used for sequence encoding.
///
/// Variants are ordered from most to least specific; every alphabet is a superset
/// of the ones before it, so classification only ever widens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlphabetType {
    /// 2-bit DNA: A, C, G, T
    Dna2bit,
    /// 3-bit DNA: adds N, R, Y
    Dna3bit,
    /// 4-bit IUPAC nucleotide codes, including U
    DnaIupac,
    /// 5-bit amino acids, ambiguity codes, stop, gap
    Protein,
    /// 8-bit, any byte
    Ascii,
}

impl Display for AlphabetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlphabetType::Dna2bit => write!(f, "dna2bit"),
            AlphabetType::Dna3bit => write!(f, "dna3bit"),
            AlphabetType::DnaIupac => write!(f, "dnaiupac"),
            AlphabetType::Protein => write!(f, "protein"),
            AlphabetType::Ascii => write!(f, "ascii"),
        }
    }
}

impl FromStr for AlphabetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dna2bit" => Ok(AlphabetType::Dna2bit),
            "dna3bit" => Ok(AlphabetType::Dna3bit),
            "dnaiupac" => Ok(AlphabetType::DnaIupac),
            "protein" => Ok(AlphabetType::Protein),
            "ascii" => Ok(AlphabetType::Ascii),
            other => Err(format!("unknown alphabet '{}'", other)),
        }
    }
}

impl AlphabetType {
    /// Returns the number of bits used per symbol for this alphabet type
    pub fn bits_per_symbol(&self) -> usize {
        lookup_alphabet(self).bits_per_symbol
    }
}

const DNA_2BIT_SYMBOLS: &[u8] = b"ACGT";
const DNA_3BIT_SYMBOLS: &[u8] = b"ACGTNRY";
const DNA_IUPAC_SYMBOLS: &[u8] = b"ACGTNRYSWKMBDHVU";
const PROTEIN_SYMBOLS: &[u8] = b"ACDEFGHIKLMNPQRSTVWYBZJUOX*-.";

/// Marks bytes outside an alphabet in the membership tables.
const NOT_IN_ALPHABET: u8 = 0xff;

/// Builds a byte → code table where a symbol's code is its position in `symbols`.
const fn encoding_table(symbols: &[u8]) -> [u8; 256] {
    let mut arr = [NOT_IN_ALPHABET; 256];
    let mut i = 0;
    while i < symbols.len() {
        arr[symbols[i] as usize] = i as u8;
        i += 1;
    }
    arr
}

/// Builds the code → byte inverse of [`encoding_table`]. Unused codes decode to `N`.
const fn decoding_table(symbols: &[u8]) -> [u8; 256] {
    let mut arr = [b'N'; 256];
    let mut i = 0;
    while i < symbols.len() {
        arr[i] = symbols[i];
        i += 1;
    }
    arr
}

const fn identity_table() -> [u8; 256] {
    let mut arr = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        arr[i] = i as u8;
        i += 1;
    }
    arr
}

const DNA_2BIT_ENCODING_ARRAY: [u8; 256] = encoding_table(DNA_2BIT_SYMBOLS);
const DNA_2BIT_DECODING_ARRAY: [u8; 256] = decoding_table(DNA_2BIT_SYMBOLS);
const DNA_3BIT_ENCODING_ARRAY: [u8; 256] = encoding_table(DNA_3BIT_SYMBOLS);
const DNA_3BIT_DECODING_ARRAY: [u8; 256] = decoding_table(DNA_3BIT_SYMBOLS);
const DNA_IUPAC_ENCODING_ARRAY: [u8; 256] = encoding_table(DNA_IUPAC_SYMBOLS);
const DNA_IUPAC_DECODING_ARRAY: [u8; 256] = decoding_table(DNA_IUPAC_SYMBOLS);
const PROTEIN_ENCODING_ARRAY: [u8; 256] = encoding_table(PROTEIN_SYMBOLS);
const PROTEIN_DECODING_ARRAY: [u8; 256] = decoding_table(PROTEIN_SYMBOLS);
const ASCII_ARRAY: [u8; 256] = identity_table();

pub const DNA_2BIT_ALPHABET: Alphabet = Alphabet {
    alphabet_type: AlphabetType::Dna2bit,
    encoding_array: &DNA_2BIT_ENCODING_ARRAY,
    decoding_array: &DNA_2BIT_DECODING_ARRAY,
    bits_per_symbol: 2,
};

pub const DNA_3BIT_ALPHABET: Alphabet = Alphabet {
    alphabet_type: AlphabetType::Dna3bit,
    encoding_array: &DNA_3BIT_ENCODING_ARRAY,
    decoding_array: &DNA_3BIT_DECODING_ARRAY,
    bits_per_symbol: 3,
};

pub const DNA_IUPAC_ALPHABET: Alphabet = Alphabet {
    alphabet_type: AlphabetType::DnaIupac,
    encoding_array: &DNA_IUPAC_ENCODING_ARRAY,
    decoding_array: &DNA_IUPAC_DECODING_ARRAY,
    bits_per_symbol: 4,
};

pub const PROTEIN_ALPHABET: Alphabet = Alphabet {
    alphabet_type: AlphabetType::Protein,
    encoding_array: &PROTEIN_ENCODING_ARRAY,
    decoding_array: &PROTEIN_DECODING_ARRAY,
    bits_per_symbol: 5,
};

pub const ASCII_ALPHABET: Alphabet = Alphabet {
    alphabet_type: AlphabetType::Ascii,
    encoding_array: &ASCII_ARRAY,
    decoding_array: &ASCII_ARRAY,
    bits_per_symbol: 8,
};

/// Get the static alphabet definition for an alphabet type.
pub fn lookup_alphabet(alphabet_type: &AlphabetType) -> &'static Alphabet {
    match alphabet_type {
        AlphabetType::Dna2bit => &DNA_2BIT_ALPHABET,
        AlphabetType::Dna3bit => &DNA_3BIT_ALPHABET,
        AlphabetType::DnaIupac => &DNA_IUPAC_ALPHABET,
        AlphabetType::Protein => &PROTEIN_ALPHABET,
        AlphabetType::Ascii => &ASCII_ALPHABET,
    }
}

/// Classify a whole sequence in one pass. The empty sequence is `Dna2bit`.
pub fn guess_alphabet(sequence: &[u8]) -> AlphabetType {
    let mut guesser = AlphabetGuesser::new();
    guesser.update(sequence);
    guesser.guess()
}

/// The narrowest alphabet containing `byte`. Case-sensitive: lowercase
/// residues only fit in `Ascii`.
fn get_minimum_alphabet_for_byte(byte: u8) -> AlphabetType {
    let index = byte as usize;
    if DNA_2BIT_ENCODING_ARRAY[index] != NOT_IN_ALPHABET {
        AlphabetType::Dna2bit
    } else if DNA_3BIT_ENCODING_ARRAY[index] != NOT_IN_ALPHABET {
        AlphabetType::Dna3bit
    } else if DNA_IUPAC_ENCODING_ARRAY[index] != NOT_IN_ALPHABET {
        AlphabetType::DnaIupac
    } else if PROTEIN_ENCODING_ARRAY[index] != NOT_IN_ALPHABET {
        AlphabetType::Protein
    } else {
        AlphabetType::Ascii
    }
}
