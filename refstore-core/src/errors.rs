use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Can't read file {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Error parsing region at line {line}: {message}")]
    RegionParse { line: usize, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
