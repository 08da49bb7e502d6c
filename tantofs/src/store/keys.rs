//! Backend key naming.
//!
//! `<path>@fobj` holds the metadata record, `<path>@data::<n>` holds block `n`.

pub const FOBJ_SUFFIX: &str = "@fobj";
pub const DATA_INFIX: &str = "@data::";

pub fn metadata_key(path: &str) -> String {
    format!("{path}{FOBJ_SUFFIX}")
}

pub fn data_key(path: &str, index: u64) -> String {
    format!("{path}{DATA_INFIX}{index}")
}
