//! Wasmtime host bridge.
//!
//! One [`WasmHost`] owns the engine, store, linker, and the shared slot
//! memory every compiled module imports. Modules are assembled from the
//! compiler's text output and instantiated against the live memory; the
//! single host import, `slots_set_host`, appends slot changes to a buffer
//! in the store data so the callback never re-enters a module. The caller
//! drains that change set after each `run` invocation.

use hdlsim_common::{EngineConfig, SimError, SimResult};
use static_assertions::const_assert_eq;
use std::io::Write as _;
use tracing::{debug, info};
use wasmtime::{Caller, Config, Engine, Linker, Memory, MemoryType, Module, Store, TypedFunc};

/// Bytes occupied by one slot: an i64 `curr` followed by an i64 `next`.
pub const SLOT_BYTES: usize = 16;
/// Byte offset of `curr` within a slot.
pub const CURR_OFFSET: usize = 0;
/// Byte offset of `next` within a slot.
pub const NEXT_OFFSET: usize = 8;
/// Maximum memory size in Wasm pages (the module import contract).
pub const MAX_PAGES: u64 = 2;

const_assert_eq!(SLOT_BYTES, NEXT_OFFSET + 8);
const_assert_eq!(CURR_OFFSET, 0);

/// Store data: the change set accumulated by the host callback.
#[derive(Debug, Default)]
pub struct HostState {
    changed: Vec<(u64, u64)>,
}

/// A compiled, instantiated module ready to run.
#[derive(Clone)]
pub struct ModuleRunner {
    run: TypedFunc<(), i64>,
}

impl std::fmt::Debug for ModuleRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRunner").finish()
    }
}

/// Owner of the wasmtime engine, store, linker, and shared slot memory.
pub struct WasmHost {
    engine: Engine,
    store: Store<HostState>,
    linker: Linker<HostState>,
    memory: Memory,
    dump_modules: bool,
    synced_slots: usize,
}

impl std::fmt::Debug for WasmHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmHost")
            .field("synced_slots", &self.synced_slots)
            .field("dump_modules", &self.dump_modules)
            .finish()
    }
}

impl WasmHost {
    /// Create the host with one page of slot memory.
    pub fn new(config: &EngineConfig) -> SimResult<Self> {
        let engine = Engine::new(&Config::new())
            .map_err(|e| SimError::ModuleAssembly(format!("failed to create engine: {e}")))?;
        let mut store = Store::new(&engine, HostState::default());

        let memory = Memory::new(&mut store, MemoryType::new(1, Some(MAX_PAGES as u32)))
            .map_err(|e| SimError::ModuleAssembly(format!("failed to create slot memory: {e}")))?;

        let mut linker = Linker::new(&engine);
        linker
            .define(&store, "", "gmem", memory)
            .map_err(|e| SimError::ModuleAssembly(format!("failed to define memory: {e}")))?;
        linker
            .func_wrap(
                "",
                "slots_set_host",
                |mut caller: Caller<'_, HostState>, index: i64, value: i64| {
                    caller.data_mut().changed.push((index as u64, value as u64));
                },
            )
            .map_err(|e| SimError::ModuleAssembly(format!("failed to define callback: {e}")))?;

        info!(
            pages = 1,
            max_pages = MAX_PAGES,
            dump_modules = config.dump_modules,
            "wasm host created"
        );

        Ok(WasmHost {
            engine,
            store,
            linker,
            memory,
            dump_modules: config.dump_modules,
            synced_slots: 0,
        })
    }

    /// Assemble and instantiate a module against the shared memory.
    pub fn instantiate(&mut self, wat_text: &str) -> SimResult<ModuleRunner> {
        if self.dump_modules {
            self.dump(wat_text);
        }
        let bytes = wat::parse_str(wat_text).map_err(|e| SimError::ModuleAssembly(e.to_string()))?;
        let module = Module::new(&self.engine, &bytes)
            .map_err(|e| SimError::ModuleAssembly(e.to_string()))?;
        let instance = self
            .linker
            .instantiate(&mut self.store, &module)
            .map_err(|e| SimError::ModuleAssembly(e.to_string()))?;
        let run = instance
            .get_typed_func::<(), i64>(&mut self.store, "run")
            .map_err(|e| SimError::ModuleAssembly(format!("missing run export: {e}")))?;
        Ok(ModuleRunner { run })
    }

    /// Invoke a module's `run` and drain the slot change set.
    ///
    /// Re-entrant: the same runner may be invoked any number of times
    /// against the live memory.
    pub fn run(&mut self, runner: &ModuleRunner) -> SimResult<(i64, Vec<(u64, u64)>)> {
        self.store.data_mut().changed.clear();
        let result = runner
            .run
            .call(&mut self.store, ())
            .map_err(|e| SimError::WasmTrap(e.to_string()))?;
        let changed = std::mem::take(&mut self.store.data_mut().changed);
        Ok((result, changed))
    }

    /// Grow the memory to hold at least `slots` slots.
    pub fn ensure_capacity(&mut self, slots: usize) -> SimResult<()> {
        let needed_bytes = slots * SLOT_BYTES;
        let page_size = 0x1_0000usize;
        let needed_pages = needed_bytes.div_ceil(page_size).max(1) as u64;
        if needed_pages > MAX_PAGES {
            return Err(SimError::Compile(format!(
                "design needs {slots} slots, exceeding the {MAX_PAGES}-page slot memory"
            )));
        }
        let current = self.memory.size(&self.store);
        if needed_pages > current {
            self.memory
                .grow(&mut self.store, needed_pages - current)
                .map_err(|e| SimError::ModuleAssembly(format!("memory grow failed: {e}")))?;
            debug!(pages = needed_pages, "slot memory grown");
        }
        Ok(())
    }

    /// Initialize memory for slots allocated since the last sync.
    ///
    /// `slot_values` yields `(curr, next)` per slot index.
    pub fn sync_new_slots<F>(&mut self, num_slots: usize, slot_values: F) -> SimResult<()>
    where
        F: Fn(usize) -> (i64, i64),
    {
        self.ensure_capacity(num_slots)?;
        for index in self.synced_slots..num_slots {
            let (curr, next) = slot_values(index);
            self.write_curr(index, curr)?;
            self.write_next(index, next)?;
        }
        self.synced_slots = num_slots;
        Ok(())
    }

    /// Read a slot's committed value.
    pub fn read_curr(&self, index: usize) -> SimResult<i64> {
        self.read_word(index * SLOT_BYTES + CURR_OFFSET)
    }

    /// Read a slot's staged value.
    pub fn read_next(&self, index: usize) -> SimResult<i64> {
        self.read_word(index * SLOT_BYTES + NEXT_OFFSET)
    }

    /// Write a slot's committed value.
    pub fn write_curr(&mut self, index: usize, value: i64) -> SimResult<()> {
        self.write_word(index * SLOT_BYTES + CURR_OFFSET, value)
    }

    /// Write a slot's staged value.
    pub fn write_next(&mut self, index: usize, value: i64) -> SimResult<()> {
        self.write_word(index * SLOT_BYTES + NEXT_OFFSET, value)
    }

    fn read_word(&self, offset: usize) -> SimResult<i64> {
        let data = self.memory.data(&self.store);
        let bytes = data
            .get(offset..offset + 8)
            .ok_or_else(|| SimError::WasmTrap(format!("slot read out of bounds at {offset}")))?;
        let mut word = [0u8; 8];
        word.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(word))
    }

    fn write_word(&mut self, offset: usize, value: i64) -> SimResult<()> {
        let data = self.memory.data_mut(&mut self.store);
        let bytes = data
            .get_mut(offset..offset + 8)
            .ok_or_else(|| SimError::WasmTrap(format!("slot write out of bounds at {offset}")))?;
        bytes.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn dump(&self, wat_text: &str) {
        let dumped = tempfile::Builder::new()
            .prefix("hdlsim-module-")
            .suffix(".wat")
            .tempfile()
            .and_then(|mut file| {
                file.write_all(wat_text.as_bytes())?;
                let (_, path) = file.keep().map_err(|e| e.error)?;
                Ok(path)
            });
        match dumped {
            Ok(path) => debug!(path = %path.display(), "dumped compiled module"),
            Err(e) => debug!(error = %e, "failed to dump compiled module"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNTER_WAT: &str = r#"
        (module
            (import "" "gmem" (memory 0 2))
            (import "" "slots_set_host" (func $slots_set_host (param i64 i64)))
            (func (export "run") (result i64)
                (i64.store offset=8 (i32.const 0)
                    (i64.add (i64.load offset=8 (i32.const 0)) (i64.const 1)))
                (call $slots_set_host (i64.const 0) (i64.load offset=8 (i32.const 0)))
                (i64.load offset=8 (i32.const 0))
            )
        )
    "#;

    fn host() -> WasmHost {
        WasmHost::new(&EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_instantiate_and_run() {
        let mut host = host();
        let runner = host.instantiate(COUNTER_WAT).unwrap();
        let (result, changed) = host.run(&runner).unwrap();
        assert_eq!(result, 1);
        assert_eq!(changed, vec![(0, 1)]);
    }

    #[test]
    fn test_runner_is_reentrant() {
        let mut host = host();
        let runner = host.instantiate(COUNTER_WAT).unwrap();
        for expected in 1..=5 {
            let (result, _) = host.run(&runner).unwrap();
            assert_eq!(result, expected);
        }
    }

    #[test]
    fn test_change_set_cleared_between_runs() {
        let mut host = host();
        let runner = host.instantiate(COUNTER_WAT).unwrap();
        let (_, first) = host.run(&runner).unwrap();
        let (_, second) = host.run(&runner).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second, vec![(0, 2)]);
    }

    #[test]
    fn test_memory_accessors() {
        let mut host = host();
        host.write_curr(3, -5).unwrap();
        host.write_next(3, 7).unwrap();
        assert_eq!(host.read_curr(3).unwrap(), -5);
        assert_eq!(host.read_next(3).unwrap(), 7);
        // neighbours untouched
        assert_eq!(host.read_curr(2).unwrap(), 0);
        assert_eq!(host.read_next(4).unwrap(), 0);
    }

    #[test]
    fn test_two_modules_share_memory() {
        let mut host = host();
        let writer = host.instantiate(COUNTER_WAT).unwrap();
        let _ = host.run(&writer).unwrap();

        const READER_WAT: &str = r#"
            (module
                (import "" "gmem" (memory 0 2))
                (import "" "slots_set_host" (func $slots_set_host (param i64 i64)))
                (func (export "run") (result i64)
                    (i64.load offset=8 (i32.const 0))
                )
            )
        "#;
        let reader = host.instantiate(READER_WAT).unwrap();
        let (result, changed) = host.run(&reader).unwrap();
        assert_eq!(result, 1);
        assert!(changed.is_empty());
    }

    #[test]
    fn test_capacity_limit() {
        let mut host = host();
        assert!(host.ensure_capacity(4096).is_ok());
        assert!(host.ensure_capacity(8192).is_ok());
        assert!(host.ensure_capacity(8193).is_err());
    }

    #[test]
    fn test_sync_new_slots_only_touches_new() {
        let mut host = host();
        host.sync_new_slots(2, |i| (i as i64, 0)).unwrap();
        host.write_curr(0, 99).unwrap();
        // a second sync starts past the already-synced range
        host.sync_new_slots(3, |i| (i as i64 * 10, 0)).unwrap();
        assert_eq!(host.read_curr(0).unwrap(), 99);
        assert_eq!(host.read_curr(2).unwrap(), 20);
    }

    #[test]
    fn test_invalid_module_text() {
        let mut host = host();
        assert!(matches!(
            host.instantiate("(module (func $broken"),
            Err(SimError::ModuleAssembly(_))
        ));
    }
}
