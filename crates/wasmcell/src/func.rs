//! Host-facing function registration and invocation.

use std::sync::Arc;
use wasmcell_environ::FunctionType;
use wasmcell_runtime::{
    catch_traps, Compartment, FuncRef, HostCode, Trap, Value,
};

/// Registers a host closure as a callable function in `compartment`.
///
/// The closure receives the compartment, the (already type-checked)
/// arguments, and the result vector to fill. Returning `Err` raises the trap
/// to the caller.
pub fn define_host_function<F>(
    compartment: &mut Compartment,
    ty: FunctionType,
    name: Option<&str>,
    func: F,
) -> FuncRef
where
    F: Fn(&mut Compartment, &[Value], &mut Vec<Value>) -> Result<(), Trap> + Send + Sync + 'static,
{
    compartment.create_function(
        ty,
        Arc::new(HostCode::new(func)),
        None,
        name.map(str::to_string),
    )
}

/// Invokes `func` with `args`, running inside the signal guards.
///
/// Arguments are checked against the function's type: a wrong count or a
/// value that is not a subtype of its parameter becomes an error without
/// entering the function. The function is pinned in the root set for the
/// duration of the call.
pub fn invoke(
    compartment: &mut Compartment,
    func: FuncRef,
    args: &[Value],
) -> Result<Vec<Value>, Trap> {
    let ty = compartment.function(func).ty;
    if args.len() != ty.params().len() {
        return Err(Trap::user(
            format!(
                "expected {} arguments, got {}",
                ty.params().len(),
                args.len()
            )
            .into(),
        ));
    }
    for (index, (arg, &expected)) in args.iter().zip(ty.params().elements()).enumerate() {
        if !arg.fits(expected) {
            return Err(Trap::user(
                format!(
                    "argument {} of type {} where {} was expected",
                    index,
                    arg.ty(),
                    expected
                )
                .into(),
            ));
        }
    }

    compartment.add_root(func);
    let mut results = Vec::with_capacity(ty.results().len());
    let mut call_result = Ok(());
    let guard_result = unsafe {
        catch_traps(|| {
            call_result = compartment.call(func, args, &mut results);
        })
    };
    compartment.remove_root(func);

    guard_result?;
    call_result.map(|()| results)
}
