//! WebAssembly trap handling, which is built on top of the lower-level
//! signalhandling mechanisms.

use crate::callstack::CallStack;
use backtrace::Backtrace;
use lazy_static::lazy_static;
use std::any::Any;
use std::cell::Cell;
use std::error::Error;
use std::fmt;
use std::io;
use std::mem;
use std::ptr;
use std::sync::{Once, RwLock};
use wasmcell_environ::TrapCode;

extern "C" {
    fn RegisterSetjmp(
        jmp_buf: *mut *const u8,
        callback: extern "C" fn(*mut u8),
        payload: *mut u8,
    ) -> i32;
    fn Unwind(jmp_buf: *const u8) -> !;
}

/// A process-global handler of last resort, consulted from the signal
/// handler before a fault is turned into a trap. Returning `true` claims the
/// signal and resumes execution.
pub type SignalHandler =
    dyn Fn(libc::c_int, *const libc::siginfo_t, *const libc::c_void) -> bool + Send + Sync;

lazy_static! {
    static ref LAST_RESORT_HANDLER: RwLock<Option<Box<SignalHandler>>> = RwLock::new(None);
}

/// Installs a process-global async-signal handler of last resort.
///
/// The handler runs on the signal stack; it must be async-signal-safe.
pub fn set_signal_handler<H>(handler: H)
where
    H: Fn(libc::c_int, *const libc::siginfo_t, *const libc::c_void) -> bool
        + Send
        + Sync
        + 'static,
{
    *LAST_RESORT_HANDLER.write().unwrap() = Some(Box::new(handler));
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use std::mem::MaybeUninit;

        static mut PREV_SIGSEGV: MaybeUninit<libc::sigaction> = MaybeUninit::uninit();
        static mut PREV_SIGBUS: MaybeUninit<libc::sigaction> = MaybeUninit::uninit();
        static mut PREV_SIGILL: MaybeUninit<libc::sigaction> = MaybeUninit::uninit();
        static mut PREV_SIGFPE: MaybeUninit<libc::sigaction> = MaybeUninit::uninit();

        unsafe fn platform_init() {
            let register = |slot: &mut MaybeUninit<libc::sigaction>, signal: i32| {
                let mut handler: libc::sigaction = mem::zeroed();
                // The flags here are relatively careful, and they are...
                //
                // SA_SIGINFO gives us access to information like the program
                // counter from where the fault happened.
                //
                // SA_ONSTACK allows us to handle signals on an alternate stack,
                // so that the handler can run in response to running out of
                // stack space on the main stack.
                //
                // SA_NODEFER allows us to reenter the signal handler if we
                // crash while handling the signal, and fall through to the
                // default handler by testing handling_trap.
                handler.sa_flags = libc::SA_SIGINFO | libc::SA_NODEFER | libc::SA_ONSTACK;
                handler.sa_sigaction = trap_handler as usize;
                libc::sigemptyset(&mut handler.sa_mask);
                if libc::sigaction(signal, &handler, slot.as_mut_ptr()) != 0 {
                    panic!(
                        "unable to install signal handler: {}",
                        io::Error::last_os_error(),
                    );
                }
            };

            // Allow handling OOB with signals on all architectures
            register(&mut PREV_SIGSEGV, libc::SIGSEGV);

            // Handle `unreachable` instructions which execute `ud2` right now
            register(&mut PREV_SIGILL, libc::SIGILL);

            // x86 uses SIGFPE to report division by zero
            if cfg!(target_arch = "x86") || cfg!(target_arch = "x86_64") {
                register(&mut PREV_SIGFPE, libc::SIGFPE);
            }

            // On ARM, handle Unaligned Accesses.
            // On Darwin, guard page accesses are raised as SIGBUS.
            if cfg!(target_arch = "arm")
                || cfg!(target_arch = "aarch64")
                || cfg!(target_os = "macos")
            {
                register(&mut PREV_SIGBUS, libc::SIGBUS);
            }
        }

        unsafe extern "C" fn trap_handler(
            signum: libc::c_int,
            siginfo: *mut libc::siginfo_t,
            context: *mut libc::c_void,
        ) {
            let previous = match signum {
                libc::SIGSEGV => &PREV_SIGSEGV,
                libc::SIGBUS => &PREV_SIGBUS,
                libc::SIGFPE => &PREV_SIGFPE,
                libc::SIGILL => &PREV_SIGILL,
                _ => panic!("unknown signal: {}", signum),
            };
            let handled = tls::with(|info| {
                // If no wasm code is executing, we don't handle this as a wasm
                // trap.
                let info = match info {
                    Some(info) => info,
                    None => return false,
                };

                let (code, faulting_addr) = classify_signal(signum, siginfo);
                let jmp_buf = info.handle_trap(
                    get_pc(context),
                    code,
                    faulting_addr,
                    |handler| handler(signum, siginfo, context),
                );

                // Figure out what to do based on the result of this handling of
                // the trap. Note that our sentinel value of 1 means that the
                // exception was handled by the last-resort handler, so we keep
                // executing.
                if jmp_buf.is_null() {
                    false
                } else if jmp_buf as usize == 1 {
                    true
                } else {
                    Unwind(jmp_buf)
                }
            });

            if handled {
                return;
            }

            // This signal is not for any wasm code we expect, so we need to
            // forward the signal to the next handler. If there is no next
            // handler (SIG_IGN or SIG_DFL), then it's time to crash. To do
            // this, we set the signal back to its original disposition and
            // return. This will cause the faulting op to be re-executed which
            // will crash in the normal way. If there is a next handler, call
            // it. It will either crash synchronously, fix up the instruction
            // so that execution can continue and return, or trigger a crash by
            // returning the signal to it's original disposition and returning.
            let previous = &*previous.as_ptr();
            if previous.sa_flags & libc::SA_SIGINFO != 0 {
                mem::transmute::<
                    usize,
                    extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void),
                >(previous.sa_sigaction)(signum, siginfo, context)
            } else if previous.sa_sigaction == libc::SIG_DFL
                || previous.sa_sigaction == libc::SIG_IGN
            {
                libc::sigaction(signum, previous, ptr::null_mut());
            } else {
                mem::transmute::<usize, extern "C" fn(libc::c_int)>(previous.sa_sigaction)(signum)
            }
        }

        unsafe fn fault_addr(siginfo: *mut libc::siginfo_t) -> usize {
            cfg_if::cfg_if! {
                if #[cfg(any(target_os = "linux", target_os = "android"))] {
                    (*siginfo).si_addr() as usize
                } else {
                    (*siginfo).si_addr as usize
                }
            }
        }

        unsafe fn classify_signal(
            signum: libc::c_int,
            siginfo: *mut libc::siginfo_t,
        ) -> (TrapCode, Option<usize>) {
            match signum {
                libc::SIGSEGV | libc::SIGBUS => {
                    (TrapCode::AccessViolation, Some(fault_addr(siginfo)))
                }
                libc::SIGILL => (TrapCode::UnreachableCodeReached, None),
                libc::SIGFPE => {
                    let code = if (*siginfo).si_code == 2 {
                        // FPE_INTOVF
                        TrapCode::IntegerOverflow
                    } else {
                        TrapCode::IntegerDivisionByZero
                    };
                    (code, None)
                }
                _ => (TrapCode::AccessViolation, None),
            }
        }

        #[allow(unused_variables)]
        unsafe fn get_pc(cx: *mut libc::c_void) -> *const u8 {
            cfg_if::cfg_if! {
                if #[cfg(all(target_os = "linux", target_arch = "x86_64"))] {
                    let cx = &*(cx as *const libc::ucontext_t);
                    cx.uc_mcontext.gregs[libc::REG_RIP as usize] as *const u8
                } else if #[cfg(all(target_os = "linux", target_arch = "aarch64"))] {
                    let cx = &*(cx as *const libc::ucontext_t);
                    cx.uc_mcontext.pc as *const u8
                } else {
                    // The faulting program counter is advisory; platforms
                    // without a known ucontext layout report none.
                    ptr::null()
                }
            }
        }
    }
}

/// This function performs the low-overhead signal handler initialization that
/// we want to do eagerly to ensure a more-deterministic global process state.
///
/// This is especially relevant for signal handlers since handler ordering
/// depends on installation order: the wasm signal handler must run *before*
/// the other crash handlers and since POSIX signal handlers work LIFO, this
/// function needs to be called at the end of the startup process, after other
/// handlers have been installed. This function can thus be called multiple
/// times, having no effect after the first call.
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(real_init);
}

fn real_init() {
    // Capturing a backtrace once ahead of time primes the dynamic loader's
    // caches, so capturing one in the trap handler later does not allocate
    // its way off the two pages of signal stack some platforms give us.
    drop(Backtrace::new_unresolved());
    unsafe {
        platform_init();
    }
}

/// Raises a user-defined trap immediately.
///
/// This function performs as-if a wasm trap was just executed, only the trap
/// has a dynamic payload associated with it which is user-provided. This trap
/// payload is then returned from `catch_traps` below.
///
/// # Safety
///
/// Only safe to call when wasm code is on the stack, aka `catch_traps` must
/// have been previously called. Additionally no Rust destructors can be on the
/// stack. They will be skipped and not executed.
pub unsafe fn raise_user_trap(data: Box<dyn Error + Send + Sync>) -> ! {
    tls::with(|info| info.unwrap().unwind_with(UnwindReason::UserTrap(data)))
}

/// Raises a trap from inside library code immediately.
///
/// This function performs as-if a wasm trap was just executed. This trap
/// payload is then returned from `catch_traps` below.
///
/// # Safety
///
/// Only safe to call when wasm code is on the stack, aka `catch_traps` must
/// have been previously called. Additionally no Rust destructors can be on the
/// stack. They will be skipped and not executed.
pub unsafe fn raise_lib_trap(trap: Trap) -> ! {
    tls::with(|info| info.unwrap().unwind_with(UnwindReason::LibTrap(trap)))
}

/// Carries a Rust panic across wasm code and resumes the panic on the other
/// side.
///
/// # Safety
///
/// Only safe to call when wasm code is on the stack, aka `catch_traps` must
/// have been previously called. Additionally no Rust destructors can be on the
/// stack. They will be skipped and not executed.
pub unsafe fn resume_panic(payload: Box<dyn Any + Send>) -> ! {
    tls::with(|info| info.unwrap().unwind_with(UnwindReason::Panic(payload)))
}

/// Stores trace message with backtrace.
#[derive(Debug)]
pub enum Trap {
    /// A user-raised trap through `raise_user_trap`.
    User(Box<dyn Error + Send + Sync>),

    /// A wasm-originating trap from wasm code itself.
    Wasm {
        /// What sort of trap happened.
        code: TrapCode,
        /// The address whose access faulted, for access violations.
        faulting_addr: Option<usize>,
        /// Native stack backtrace at the time the trap occurred.
        backtrace: Backtrace,
    },

    /// A trap indicating that the runtime was unable to allocate sufficient memory.
    OOM {
        /// Native stack backtrace at the time the OOM occurred.
        backtrace: Backtrace,
    },
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trap::User(user) => user.fmt(f),
            Trap::Wasm {
                code,
                faulting_addr: Some(addr),
                ..
            } => write!(f, "{} at {:#x}", code, addr),
            Trap::Wasm { code, .. } => code.fmt(f),
            Trap::OOM { .. } => write!(f, "Out of memory"),
        }
    }
}

impl std::error::Error for Trap {}

impl Trap {
    /// Construct a new Wasm trap with the given trap code.
    ///
    /// Internally saves a backtrace when constructed.
    pub fn wasm(code: TrapCode) -> Self {
        Trap::Wasm {
            code,
            faulting_addr: None,
            backtrace: Backtrace::new_unresolved(),
        }
    }

    /// Construct a new user trap carrying the given payload.
    pub fn user(data: Box<dyn Error + Send + Sync>) -> Self {
        Trap::User(data)
    }

    /// Construct a new OOM trap.
    ///
    /// Internally saves a backtrace when constructed.
    pub fn oom() -> Self {
        Trap::OOM {
            backtrace: Backtrace::new_unresolved(),
        }
    }

    /// Returns the trap code, if this was a wasm-originating trap.
    pub fn trap_code(&self) -> Option<TrapCode> {
        match self {
            Trap::Wasm { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns the captured call stack, if one was captured.
    pub fn call_stack(&self) -> Option<CallStack> {
        match self {
            Trap::Wasm { backtrace, .. } | Trap::OOM { backtrace } => {
                Some(CallStack::from_backtrace(backtrace))
            }
            Trap::User(_) => None,
        }
    }
}

/// Catches any wasm traps that happen within the execution of `closure`,
/// returning them as a `Result`.
///
/// # Safety
///
/// Highly unsafe since `closure` won't have any dtors run if a trap unwinds
/// through it.
pub unsafe fn catch_traps<F>(mut closure: F) -> Result<(), Trap>
where
    F: FnMut(),
{
    init();

    // Ensure that we have our sigaltstack installed.
    #[cfg(unix)]
    setup_unix_sigaltstack()?;

    return CallThreadState::new().with(|cx| {
        RegisterSetjmp(
            cx.jmp_buf.as_ptr(),
            call_closure::<F>,
            &mut closure as *mut F as *mut u8,
        )
    });

    extern "C" fn call_closure<F>(payload: *mut u8)
    where
        F: FnMut(),
    {
        unsafe { (*(payload as *mut F))() }
    }
}

/// Temporary state stored on the stack which is registered in the `tls` module
/// below for calls into wasm.
pub struct CallThreadState {
    unwind: Cell<UnwindReason>,
    jmp_buf: Cell<*const u8>,
    prev: Option<*const CallThreadState>,
    handling_trap: Cell<bool>,
}

enum UnwindReason {
    None,
    Panic(Box<dyn Any + Send>),
    UserTrap(Box<dyn Error + Send + Sync>),
    LibTrap(Trap),
    Trap {
        backtrace: Backtrace,
        code: TrapCode,
        faulting_addr: Option<usize>,
    },
}

impl CallThreadState {
    fn new() -> CallThreadState {
        CallThreadState {
            unwind: Cell::new(UnwindReason::None),
            jmp_buf: Cell::new(ptr::null()),
            prev: None,
            handling_trap: Cell::new(false),
        }
    }

    fn with(mut self, closure: impl FnOnce(&CallThreadState) -> i32) -> Result<(), Trap> {
        tls::with(|prev| {
            self.prev = prev.map(|p| p as *const _);
            let ret = tls::set(&self, || closure(&self));
            match self.unwind.replace(UnwindReason::None) {
                UnwindReason::None => {
                    debug_assert_eq!(ret, 1);
                    Ok(())
                }
                UnwindReason::UserTrap(data) => {
                    debug_assert_eq!(ret, 0);
                    Err(Trap::User(data))
                }
                UnwindReason::LibTrap(trap) => Err(trap),
                UnwindReason::Trap {
                    backtrace,
                    code,
                    faulting_addr,
                } => {
                    debug_assert_eq!(ret, 0);
                    Err(Trap::Wasm {
                        code,
                        faulting_addr,
                        backtrace,
                    })
                }
                UnwindReason::Panic(panic) => {
                    debug_assert_eq!(ret, 0);
                    std::panic::resume_unwind(panic)
                }
            }
        })
    }

    fn unwind_with(&self, reason: UnwindReason) -> ! {
        self.unwind.replace(reason);
        unsafe {
            Unwind(self.jmp_buf.get());
        }
    }

    /// Trap handler using our thread-local state.
    ///
    /// * `pc` - the program counter the trap happened at, advisory
    /// * `code` - the classification of the faulting signal
    /// * `faulting_addr` - the accessed address, for access violations
    /// * `call_handler` - a closure used to invoke the registered last-resort
    ///   handler, if any.
    ///
    /// Attempts to handle the trap if it's a wasm trap. Returns a few
    /// different things:
    ///
    /// * null - the trap didn't look like a wasm trap and should continue as a
    ///   trap
    /// * 1 as a pointer - the trap was handled by the last-resort handler and
    ///   execution should continue
    /// * a different pointer - a jmp_buf buffer to longjmp to, meaning that
    ///   the wasm trap was successfully handled.
    #[allow(dead_code)]
    fn handle_trap(
        &self,
        _pc: *const u8,
        code: TrapCode,
        faulting_addr: Option<usize>,
        call_handler: impl Fn(&SignalHandler) -> bool,
    ) -> *const u8 {
        // If we hit a fault while handling a previous trap, that's quite bad,
        // so bail out and let the system handle this recursive segfault.
        //
        // Otherwise flag ourselves as handling a trap, do the trap handling,
        // and reset our trap handling flag.
        if self.handling_trap.replace(true) {
            return ptr::null();
        }

        // First up see if the process registered a handler of last resort, in
        // which case run it. If it claims the signal then we return that the
        // trap was handled and execution continues.
        if let Some(handler) = LAST_RESORT_HANDLER.read().unwrap().as_ref() {
            if call_handler(handler) {
                self.handling_trap.set(false);
                return 1 as *const _;
            }
        }

        // If we haven't set up a landing pad there's no wasm on the stack and
        // this fault isn't ours.
        if self.jmp_buf.get().is_null() {
            self.handling_trap.set(false);
            return ptr::null();
        }
        let backtrace = Backtrace::new_unresolved();
        self.unwind.replace(UnwindReason::Trap {
            backtrace,
            code,
            faulting_addr,
        });
        self.handling_trap.set(false);
        self.jmp_buf.get()
    }
}

// A private inner module for managing the TLS state that we require across
// calls into wasm. A trap may happen during execution which requires us to
// read some contextual state to figure out what to do with it. This `tls`
// module is used to persist that information from the caller to the trap
// site.
mod tls {
    use super::CallThreadState;
    use std::cell::Cell;
    use std::ptr;

    thread_local!(static PTR: Cell<*const CallThreadState> = Cell::new(ptr::null()));

    /// Configures thread local state such that for the duration of the
    /// execution of `closure` any call to `with` will yield `ptr`, unless this
    /// is recursively called again.
    pub fn set<R>(ptr: &CallThreadState, closure: impl FnOnce() -> R) -> R {
        struct Reset<'a, T: Copy>(&'a Cell<T>, T);

        impl<T: Copy> Drop for Reset<'_, T> {
            fn drop(&mut self) {
                self.0.set(self.1);
            }
        }

        PTR.with(|p| {
            let _r = Reset(p, p.replace(ptr));
            closure()
        })
    }

    /// Returns the last pointer configured with `set` above, if any.
    pub fn with<R>(closure: impl FnOnce(Option<&CallThreadState>) -> R) -> R {
        PTR.with(|ptr| {
            let p = ptr.get();
            unsafe { closure(if p.is_null() { None } else { Some(&*p) }) }
        })
    }
}

/// A module for registering a custom alternate signal stack (sigaltstack).
///
/// Rust's libstd installs an alternate stack with size `SIGSTKSZ`, which is not
/// always large enough for our signal handling code. Override it by creating
/// and registering our own alternate stack that is large enough and has a guard
/// page.
#[cfg(unix)]
fn setup_unix_sigaltstack() -> Result<(), Trap> {
    use std::cell::RefCell;
    use std::ptr::null_mut;

    thread_local! {
        /// Thread-local state is lazy-initialized on the first time it's used,
        /// and dropped when the thread exits.
        static TLS: RefCell<Tls> = RefCell::new(Tls::None);
    }

    /// The size of the sigaltstack (not including the guard, which will be
    /// added). Make this large enough to run our signal handlers.
    const MIN_STACK_SIZE: usize = 16 * 4096;

    enum Tls {
        None,
        Allocated {
            mmap_ptr: *mut libc::c_void,
            mmap_size: usize,
        },
        BigEnough,
    }

    return TLS.with(|slot| unsafe {
        let mut slot = slot.borrow_mut();
        match *slot {
            Tls::None => {}
            // already checked
            _ => return Ok(()),
        }

        // Check to see if the existing sigaltstack, if it exists, is big
        // enough. If so we don't need to allocate our own.
        let mut old_stack = mem::zeroed();
        let r = libc::sigaltstack(ptr::null(), &mut old_stack);
        assert_eq!(r, 0, "learning about sigaltstack failed");
        if old_stack.ss_flags & libc::SS_DISABLE == 0 && old_stack.ss_size >= MIN_STACK_SIZE {
            *slot = Tls::BigEnough;
            return Ok(());
        }

        // ... but failing that we need to allocate our own, so do all that
        // here.
        let page_size = crate::mmap::page_size();
        let guard_size = page_size;
        let alloc_size = guard_size + MIN_STACK_SIZE;

        let ptr = libc::mmap(
            null_mut(),
            alloc_size,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        );
        if ptr == libc::MAP_FAILED {
            return Err(Trap::oom());
        }

        // Prepare the stack with readable/writable memory and then register it
        // with `sigaltstack`.
        let stack_ptr = (ptr as usize + guard_size) as *mut libc::c_void;
        let r = libc::mprotect(
            stack_ptr,
            MIN_STACK_SIZE,
            libc::PROT_READ | libc::PROT_WRITE,
        );
        assert_eq!(r, 0, "mprotect to configure memory for sigaltstack failed");
        let new_stack = libc::stack_t {
            ss_sp: stack_ptr,
            ss_flags: 0,
            ss_size: MIN_STACK_SIZE,
        };
        let r = libc::sigaltstack(&new_stack, ptr::null_mut());
        assert_eq!(r, 0, "registering new sigaltstack failed");

        *slot = Tls::Allocated {
            mmap_ptr: ptr,
            mmap_size: alloc_size,
        };
        Ok(())
    });

    impl Drop for Tls {
        fn drop(&mut self) {
            let (ptr, size) = match self {
                Tls::Allocated {
                    mmap_ptr,
                    mmap_size,
                } => (*mmap_ptr, *mmap_size),
                _ => return,
            };
            unsafe {
                // Deallocate the stack memory.
                let r = libc::munmap(ptr, size);
                debug_assert_eq!(r, 0, "munmap failed during thread shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catch_traps_passes_through_success() {
        let mut ran = false;
        unsafe {
            catch_traps(|| ran = true).unwrap();
        }
        assert!(ran);
    }

    #[test]
    fn lib_traps_unwind_to_the_catch_site() {
        let err = unsafe {
            catch_traps(|| {
                raise_lib_trap(Trap::wasm(TrapCode::UnreachableCodeReached));
            })
        }
        .unwrap_err();
        assert_eq!(err.trap_code(), Some(TrapCode::UnreachableCodeReached));
        assert!(!err.call_stack().unwrap().is_empty());
    }

    #[test]
    fn user_traps_carry_their_payload() {
        #[derive(Debug)]
        struct Interrupted;
        impl fmt::Display for Interrupted {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("interrupted")
            }
        }
        impl Error for Interrupted {}

        let err = unsafe {
            catch_traps(|| {
                raise_user_trap(Box::new(Interrupted));
            })
        }
        .unwrap_err();
        assert!(matches!(err, Trap::User(_)));
        assert_eq!(err.to_string(), "interrupted");
    }

    #[test]
    #[cfg(unix)]
    fn faults_in_guard_pages_become_traps() {
        use crate::mmap::Mmap;

        // One committed page followed by a reserved-but-inaccessible page:
        // the layout of a linear memory's guard region. Touching the guard
        // under the trap guards yields an access-violation trap with the
        // faulting address.
        let page = crate::mmap::page_size();
        let mmap = Mmap::accessible_reserved(page, 2 * page).unwrap();
        let guard_addr = mmap.as_ptr() as usize + page;

        let err = unsafe {
            catch_traps(|| {
                let ptr = guard_addr as *const u8;
                std::ptr::read_volatile(ptr);
            })
        }
        .unwrap_err();
        assert_eq!(err.trap_code(), Some(TrapCode::AccessViolation));
        match err {
            Trap::Wasm { faulting_addr, .. } => assert_eq!(faulting_addr, Some(guard_addr)),
            _ => unreachable!(),
        }
    }

    #[test]
    #[cfg(unix)]
    fn decommitted_pages_are_unreachable() {
        use crate::mmap::Mmap;

        let page = crate::mmap::page_size();
        let mut mmap = Mmap::with_at_least(page).unwrap();
        mmap.as_mut_slice()[0] = 1;
        mmap.decommit(0, page);
        let addr = mmap.as_ptr() as usize;

        let err = unsafe {
            catch_traps(|| {
                let ptr = addr as *const u8;
                std::ptr::read_volatile(ptr);
            })
        }
        .unwrap_err();
        assert_eq!(err.trap_code(), Some(TrapCode::AccessViolation));
    }
}
