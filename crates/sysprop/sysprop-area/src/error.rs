/// Errors surfaced by the writer path (`add`/`update`) and by `attach`.
///
/// Query-path misses are *not* errors in this API: `find`/`find_nth` return
/// `Option`, and `get` silently returns a zero-length value on a miss,
/// matching the original `__system_property_get` contract.
#[derive(Debug, thiserror::Error)]
pub enum AreaError {
    #[error("property name or value length out of range")]
    Invalid,
    #[error("property area is full ({0} entries)")]
    Full(usize),
    #[error("invalid property area: {0}")]
    BadArea(&'static str),
    #[error("property area I/O error")]
    Io(#[from] std::io::Error),
}
