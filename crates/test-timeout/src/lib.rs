//! `#[timeout]` and `#[tokio_timeout_test]` wrap a test body in a watchdog
//! thread so a hung socket or lock fails the test instead of stalling the run.
//!
//! Both accept an optional limit in seconds (`#[timeout(5)]`), default 60.
//! `SPALL_TEST_TIMEOUT_SECS` overrides the limit at run time.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, Block, ItemFn, LitInt};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let timeout_secs = match parse_timeout(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }
    sig.asyncness = None;

    let body = async_body(&block);
    let attrs = strip_test_attrs(attrs);
    expand(quote!(#(#attrs)* #vis #sig), body, timeout_secs).into()
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let timeout_secs = match parse_timeout(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "timeout attribute expects a synchronous test function; use tokio_timeout_test",
        )
        .to_compile_error()
        .into();
    }

    let attrs = strip_test_attrs(attrs);
    expand(quote!(#(#attrs)* #vis #sig), quote!(#block), timeout_secs).into()
}

fn parse_timeout(attr: TokenStream) -> syn::Result<u64> {
    if attr.is_empty() {
        return Ok(DEFAULT_TIMEOUT_SECS);
    }
    let lit: LitInt = syn::parse(attr)?;
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
    }
    Ok(secs)
}

fn async_body(block: &Block) -> TokenStream2 {
    quote! {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build Tokio runtime");
        runtime.block_on(async {
            tokio::time::timeout(timeout_duration, async move #block)
                .await
                .expect("test timed out");
        });
    }
}

/// Emits `#[test] <signature> { watchdog(<body>) }`. The body runs on its own
/// thread; a panic is re-raised on the test thread, a timeout panics there.
fn expand(signature: TokenStream2, body: TokenStream2, timeout_secs: u64) -> TokenStream2 {
    quote! {
        #[test]
        #signature {
            let timeout_duration = std::time::Duration::from_secs(
                std::env::var("SPALL_TEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|value| value.parse::<u64>().ok())
                    .filter(|secs| *secs > 0)
                    .unwrap_or(#timeout_secs),
            );
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| { #body }));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(timeout_duration) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test timed out after {:?}", timeout_duration)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    }
}

/// Drops `#[test]` and `#[tokio::test]` so the wrapper's own `#[test]` is the
/// only one emitted.
fn strip_test_attrs(attrs: Vec<Attribute>) -> Vec<Attribute> {
    attrs
        .into_iter()
        .filter(|attr| {
            let path = attr.path();
            let is_test = path.is_ident("test");
            let is_tokio_test = path.segments.len() == 2
                && path.segments[0].ident == "tokio"
                && path.segments[1].ident == "test";
            !(is_test || is_tokio_test)
        })
        .collect()
}
