//! wasmtime sandbox.
//!
//! One [`WasmSandbox`] owns one store and one instance. Guest memory is
//! capped by the descriptor's store limit. The only host capability the
//! guest gets is `wasi_snapshot_preview1::random_get`; every other import is
//! linked to a trap so toolchain-generated WASI imports do not prevent
//! instantiation.

use sandcrypt_core::{Sandbox, SandboxError};
use wasmtime::{
    Caller, Engine, Extern, Func, Instance, Linker, Memory, Module, Store, StoreLimits,
    StoreLimitsBuilder, TypedFunc, Val, ValType, WasmParams, WasmResults,
};

use crate::descriptor::ModuleDescriptor;

const WASI_MODULE: &str = "wasi_snapshot_preview1";

const WASI_ERRNO_SUCCESS: i32 = 0;
const WASI_ERRNO_FAULT: i32 = 21;
const WASI_ERRNO_IO: i32 = 29;

/// Per-store host state.
struct HostState {
    limits: StoreLimits,
    memory_export: String,
}

/// A module instance behind the sandbox seam.
pub struct WasmSandbox {
    store: Store<HostState>,
    instance: Instance,
    memory: Memory,
    malloc: TypedFunc<i32, i32>,
    free: TypedFunc<i32, ()>,
}

impl WasmSandbox {
    /// Instantiate `module` under the limits and export names of
    /// `descriptor`, running its initializer if it has one.
    pub fn instantiate(
        engine: &Engine,
        module: &Module,
        descriptor: &ModuleDescriptor,
    ) -> Result<Self, SandboxError> {
        let state = HostState {
            limits: StoreLimitsBuilder::new()
                .memory_size(descriptor.limits.max_memory_bytes)
                .instances(1)
                .build(),
            memory_export: descriptor.exports.memory.clone(),
        };
        let mut store = Store::new(engine, state);
        store.limiter(|state| &mut state.limits);

        let linker = host_linker(engine, module)?;
        let instance = linker.instantiate(&mut store, module).map_err(instantiation)?;

        let memory = instance.get_memory(&mut store, &descriptor.exports.memory).ok_or_else(|| {
            SandboxError::Instantiation(format!(
                "module does not export memory '{}'",
                descriptor.exports.memory
            ))
        })?;
        let malloc = support_export::<i32, i32>(&instance, &mut store, &descriptor.exports.malloc)?;
        let free = support_export::<i32, ()>(&instance, &mut store, &descriptor.exports.free)?;

        if let Ok(init) = instance.get_typed_func::<(), ()>(&mut store, &descriptor.exports.initialize) {
            init.call(&mut store, ()).map_err(instantiation)?;
        }

        tracing::debug!(
            module = %descriptor.name,
            memory_bytes = memory.data_size(&store),
            "wasm module instantiated"
        );
        Ok(Self { store, instance, memory, malloc, free })
    }

    /// Current size of the guest's linear memory in bytes.
    pub fn memory_size(&self) -> usize {
        self.memory.data_size(&self.store)
    }
}

impl Sandbox for WasmSandbox {
    type Export = Func;

    fn bind(&mut self, symbol: &str, arity: usize) -> Option<Func> {
        let func = self.instance.get_func(&mut self.store, symbol)?;
        let ty = func.ty(&self.store);
        let mut results = ty.results();
        let returns_int = matches!(results.next(), Some(ValType::I32)) && results.next().is_none();
        let params = ty.params();
        let takes_ints =
            params.len() == arity && params.into_iter().all(|param| matches!(param, ValType::I32));

        if !(takes_ints && returns_int) {
            tracing::debug!(symbol, arity, "export signature does not match native ABI");
            return None;
        }
        Some(func)
    }

    fn allocate(&mut self, len: usize) -> Result<u32, SandboxError> {
        let request = i32::try_from(len).map_err(|_| SandboxError::AllocationFailed { len })?;
        let ptr = self
            .malloc
            .call(&mut self.store, request)
            .map_err(|e| SandboxError::Trap(format!("malloc: {e:#}")))?;
        if ptr == 0 {
            return Err(SandboxError::AllocationFailed { len });
        }
        Ok(ptr as u32)
    }

    fn release(&mut self, offset: u32) -> Result<(), SandboxError> {
        self.free
            .call(&mut self.store, offset as i32)
            .map_err(|e| SandboxError::Trap(format!("free: {e:#}")))
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), SandboxError> {
        self.memory
            .write(&mut self.store, offset as usize, bytes)
            .map_err(|_| SandboxError::OutOfBounds { offset, len: bytes.len() })
    }

    fn read(&self, offset: u32, dest: &mut [u8]) -> Result<(), SandboxError> {
        self.memory
            .read(&self.store, offset as usize, dest)
            .map_err(|_| SandboxError::OutOfBounds { offset, len: dest.len() })
    }

    fn invoke(&mut self, export: &Func, args: &[i32]) -> Result<i32, SandboxError> {
        let params: Vec<Val> = args.iter().copied().map(Val::I32).collect();
        let mut results = [Val::I32(0)];
        export
            .call(&mut self.store, &params, &mut results)
            .map_err(|e| SandboxError::Trap(format!("{e:#}")))?;
        results[0].i32().ok_or_else(|| SandboxError::Trap("entry point returned a non-int".to_string()))
    }

    fn zero(&mut self, offset: u32, len: usize) -> Result<(), SandboxError> {
        let start = offset as usize;
        self.memory
            .data_mut(&mut self.store)
            .get_mut(start..start.saturating_add(len))
            .ok_or(SandboxError::OutOfBounds { offset, len })?
            .fill(0);
        Ok(())
    }
}

impl std::fmt::Debug for WasmSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmSandbox").field("memory_size", &self.memory_size()).finish_non_exhaustive()
    }
}

fn host_linker(engine: &Engine, module: &Module) -> Result<Linker<HostState>, SandboxError> {
    let mut linker = Linker::new(engine);
    linker.func_wrap(WASI_MODULE, "random_get", random_get).map_err(instantiation)?;
    linker.define_unknown_imports_as_traps(module).map_err(instantiation)?;
    Ok(linker)
}

/// `random_get(buf, buf_len) -> errno`, filled from the host CSPRNG.
fn random_get(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> i32 {
    let export = caller.data().memory_export.clone();
    let Some(memory) = caller.get_export(&export).and_then(Extern::into_memory) else {
        return WASI_ERRNO_FAULT;
    };

    let start = ptr as u32 as usize;
    let end = start.saturating_add(len as u32 as usize);
    let Some(dest) = memory.data_mut(&mut caller).get_mut(start..end) else {
        return WASI_ERRNO_FAULT;
    };

    match getrandom::fill(dest) {
        Ok(()) => WASI_ERRNO_SUCCESS,
        Err(e) => {
            tracing::warn!(error = %e, "host entropy unavailable to guest");
            WASI_ERRNO_IO
        },
    }
}

/// Resolve an allocator export, bare or with a leading underscore.
fn support_export<P: WasmParams, R: WasmResults>(
    instance: &Instance,
    store: &mut Store<HostState>,
    name: &str,
) -> Result<TypedFunc<P, R>, SandboxError> {
    let prefixed = format!("_{name}");
    instance
        .get_typed_func::<P, R>(&mut *store, name)
        .or_else(|_| instance.get_typed_func::<P, R>(&mut *store, &prefixed))
        .map_err(|e| SandboxError::Instantiation(format!("export '{name}': {e:#}")))
}

fn instantiation(e: wasmtime::Error) -> SandboxError {
    SandboxError::Instantiation(format!("{e:#}"))
}
