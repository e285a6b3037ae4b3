//! Native addon used by the integration tests, compiled as a cdylib at test time

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

static READY: AtomicBool = AtomicBool::new(false);
static INITS: AtomicUsize = AtomicUsize::new(0);
static SHUTDOWNS: AtomicUsize = AtomicUsize::new(0);
static NAMESPACE: Mutex<String> = Mutex::new(String::new());

fn give(text: String) -> *mut c_char {
    CString::new(text).map(CString::into_raw).unwrap_or(std::ptr::null_mut())
}

#[no_mangle]
pub unsafe extern "C" fn addon_init(namespace: *const c_char) -> c_int {
    let namespace = CStr::from_ptr(namespace).to_string_lossy().into_owned();
    *NAMESPACE.lock().unwrap() = namespace;
    INITS.fetch_add(1, Ordering::SeqCst);
    READY.store(true, Ordering::SeqCst);
    0
}

#[no_mangle]
pub extern "C" fn addon_shutdown() {
    READY.store(false, Ordering::SeqCst);
    SHUTDOWNS.fetch_add(1, Ordering::SeqCst);
}

#[no_mangle]
pub extern "C" fn addon_exports() -> *mut c_char {
    give(r#"["status", "echo", "fail", "not-an-identifier"]"#.to_string())
}

#[no_mangle]
pub unsafe extern "C" fn addon_invoke(
    name: *const c_char,
    args: *const c_char,
    result: *mut *mut c_char,
) -> c_int {
    let name = CStr::from_ptr(name).to_string_lossy().into_owned();
    let args = CStr::from_ptr(args).to_string_lossy().into_owned();
    let (code, output) = match name.as_str() {
        "status" => (
            0,
            format!(
                r#"{{"ready":{},"inits":{},"shutdowns":{},"namespace":{}}}"#,
                READY.load(Ordering::SeqCst),
                INITS.load(Ordering::SeqCst),
                SHUTDOWNS.load(Ordering::SeqCst),
                NAMESPACE.lock().unwrap()
            ),
        ),
        "echo" => (0, args),
        "fail" => (3, "deliberate failure".to_string()),
        _ => return 1,
    };
    *result = give(output);
    code
}

#[no_mangle]
pub unsafe extern "C" fn addon_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}
