/// Macro to simplify creating an [`OpFn`](crate::OpFn).
///
/// Takes an optional synchronous setup block, a closure-style argument
/// binding, and a mandatory async logic block that evaluates to an
/// [`OpOutput`](crate::OpOutput). Handles the `Arc`/`Box::pin` wrapping.
///
/// # Usage
///
/// ```
/// use cmdkeeper::op_fn;
/// use serde_json::json;
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
///
/// let counter = Arc::new(AtomicUsize::new(0));
///
/// // With setup block: runs once per invocation, before the future is built.
/// let counted = op_fn! {
///     { let counter = counter.clone(); }
///     |args| {
///         counter.fetch_add(1, Ordering::SeqCst);
///         Ok(json!({ "args": args }))
///     }
/// };
///
/// // Without setup block:
/// let echo = op_fn! {
///     |args| { Ok(json!(args.join(" "))) }
/// };
/// # let _ = (counted, echo);
/// ```
#[macro_export]
macro_rules! op_fn {
    // Matcher 1: setup block, then `|args| { ... }`
    (
        { $($setup_stmts:stmt);* $(;)? }
        |$args:ident| $main_block:block
    ) => {{
        let op: $crate::OpFn = ::std::sync::Arc::new(move |$args: ::std::vec::Vec<::std::string::String>| {
            $($setup_stmts;)*

            let fut = async move {
                let output: $crate::OpOutput = $main_block;
                output
            };

            ::std::boxed::Box::pin(fut)
                as ::std::pin::Pin<::std::boxed::Box<dyn ::std::future::Future<Output = $crate::OpOutput> + Send + 'static>>
        });
        op
    }};

    // Matcher 2: only `|args| { ... }`
    (
        |$args:ident| $main_block:block
    ) => {{
        let op: $crate::OpFn = ::std::sync::Arc::new(move |$args: ::std::vec::Vec<::std::string::String>| {
            let fut = async move {
                let output: $crate::OpOutput = $main_block;
                output
            };

            ::std::boxed::Box::pin(fut)
                as ::std::pin::Pin<::std::boxed::Box<dyn ::std::future::Future<Output = $crate::OpOutput> + Send + 'static>>
        });
        op
    }};
}
