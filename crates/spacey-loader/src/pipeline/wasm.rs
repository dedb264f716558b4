// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! WebAssembly modules.
//!
//! The import section of a binary lists the modules it depends on. Those
//! become the registration's dependencies; their namespaces are collected
//! by setters and handed to the [`WasmRuntime`](crate::script::WasmRuntime)
//! when the module executes.

use crate::error::{LoaderError, Result};
use crate::key::ModuleKey;
use crate::loader::Loader;
use crate::namespace::Namespace;
use crate::record::{Declaration, Registration};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// `\0asm`
pub const MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];

const IMPORT_SECTION: u8 = 2;

/// Whether `bytes` start with the WebAssembly magic number.
pub fn is_wasm(bytes: &[u8]) -> bool {
    bytes.starts_with(&MAGIC)
}

/// Module names of the import section, deduplicated in order.
pub fn import_modules(bytes: &[u8]) -> std::result::Result<Vec<String>, String> {
    if !is_wasm(bytes) {
        return Err("missing magic number".into());
    }
    if bytes.len() < 8 {
        return Err("truncated header".into());
    }

    let mut reader = Reader { bytes, pos: 8 };
    let mut modules: Vec<String> = Vec::new();
    while !reader.at_end() {
        let id = reader.byte()?;
        let size = reader.leb_u32()? as usize;
        let end = reader
            .pos
            .checked_add(size)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| format!("section {id} runs past the end of the module"))?;

        if id == IMPORT_SECTION {
            let count = reader.leb_u32()?;
            for _ in 0..count {
                let module = reader.name()?;
                let _field = reader.name()?;
                reader.import_descriptor()?;
                if !modules.contains(&module) {
                    modules.push(module);
                }
            }
            if reader.pos != end {
                return Err("import section size mismatch".into());
            }
            // At most one import section.
            return Ok(modules);
        }
        reader.pos = end;
    }
    Ok(modules)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn byte(&mut self) -> std::result::Result<u8, String> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| format!("unexpected end at offset {}", self.pos))?;
        self.pos += 1;
        Ok(byte)
    }

    /// Unsigned LEB128, at most five bytes.
    fn leb_u32(&mut self) -> std::result::Result<u32, String> {
        let mut result: u32 = 0;
        for shift in (0..35).step_by(7) {
            let byte = self.byte()?;
            result |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(format!("integer too long at offset {}", self.pos))
    }

    fn name(&mut self) -> std::result::Result<String, String> {
        let len = self.leb_u32()? as usize;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| format!("name runs past the end at offset {}", self.pos))?;
        let name = std::str::from_utf8(&self.bytes[self.pos..end])
            .map_err(|_| format!("invalid UTF-8 name at offset {}", self.pos))?
            .to_string();
        self.pos = end;
        Ok(name)
    }

    fn limits(&mut self) -> std::result::Result<(), String> {
        let flags = self.byte()?;
        self.leb_u32()?;
        if flags & 0x01 != 0 {
            self.leb_u32()?;
        }
        Ok(())
    }

    fn import_descriptor(&mut self) -> std::result::Result<(), String> {
        match self.byte()? {
            // function: type index
            0x00 => self.leb_u32().map(drop),
            // table: element type and limits
            0x01 => {
                self.byte()?;
                self.limits()
            }
            0x02 => self.limits(),
            // global: value type and mutability
            0x03 => {
                self.byte()?;
                self.byte().map(drop)
            }
            // tag: attribute and type index
            0x04 => {
                self.byte()?;
                self.leb_u32().map(drop)
            }
            kind => Err(format!("unknown import kind {kind:#04x}")),
        }
    }
}

/// Declarative registration of a WebAssembly binary.
pub(crate) fn registration(loader: &Loader, key: &ModuleKey, bytes: &[u8]) -> Result<Registration> {
    let deps = import_modules(bytes).map_err(|reason| LoaderError::MalformedWasm {
        key: key.to_string(),
        reason,
    })?;
    let runtime = loader.inner.wasm.clone().ok_or_else(|| {
        LoaderError::load(format!("No WebAssembly runtime configured to instantiate {key}"))
    })?;

    let key = key.clone();
    let bytes = Bytes::copy_from_slice(bytes);
    let names = deps.clone();
    Ok(Registration::declarative(deps, move |exporter, _| {
        let imports: Arc<Mutex<BTreeMap<String, Namespace>>> = Arc::default();
        let mut declaration = Declaration::new();
        for name in names {
            let imports = imports.clone();
            declaration = declaration.setter(move |namespace| {
                imports.lock().insert(name.clone(), namespace.clone());
            });
        }

        Ok(declaration.execute(move || {
            let imports = imports.lock().clone();
            let exports = runtime.instantiate(&key, &bytes, &imports)?;
            exporter.export_all(exports);
            Ok(())
        }))
    }))
}
