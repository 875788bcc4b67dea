//! Conversion of debug files into symbol tables, and address lookups in them.

mod convert;
mod table;

pub use convert::{convert_elf, process_elf_data};
pub use table::{OwnedSymCache, SymbolTable};
