//! Memory-page estimation from a module's binary sections.

use wasmparser::{Parser, Payload, TypeRef};

use crate::error::{WasmError, WasmResult};

/// Estimate a module's initial memory footprint in 64 KiB pages.
///
/// Sums the initial page counts of all defined and imported memories.
/// Modules that declare no memory are charged the 1-page minimum, so
/// every loaded module has a non-zero footprint in the aggregate
/// budget.
///
/// # Errors
///
/// Returns [`WasmError::InvalidModule`] if the binary does not parse.
pub fn estimate_memory_pages(name: &str, bytes: &[u8]) -> WasmResult<u32> {
    let mut pages: u64 = 0;

    for payload in Parser::new(0).parse_all(bytes) {
        let payload = payload.map_err(|e| WasmError::InvalidModule {
            module: name.to_string(),
            detail: e.to_string(),
        })?;
        match payload {
            Payload::MemorySection(section) => {
                for memory in section {
                    let memory = memory.map_err(|e| WasmError::InvalidModule {
                        module: name.to_string(),
                        detail: e.to_string(),
                    })?;
                    pages = pages.saturating_add(memory.initial);
                }
            },
            Payload::ImportSection(section) => {
                for import in section {
                    let import = import.map_err(|e| WasmError::InvalidModule {
                        module: name.to_string(),
                        detail: e.to_string(),
                    })?;
                    if let TypeRef::Memory(memory) = import.ty {
                        pages = pages.saturating_add(memory.initial);
                    }
                }
            },
            _ => {},
        }
    }

    Ok(u32::try_from(pages.max(1)).unwrap_or(u32::MAX))
}
