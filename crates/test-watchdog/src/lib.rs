//! Attribute macros that fail a hung test instead of letting it wedge the
//! whole suite.
//!
//! `#[test_watchdog::timeout]` wraps a synchronous test and
//! `#[test_watchdog::tokio_timeout_test]` wraps an async test in a
//! current-thread Tokio runtime. Both run the body on a watchdog thread and
//! panic if it has not reported back within the deadline (60s unless
//! overridden, e.g. `#[test_watchdog::timeout(10)]`).

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_DEADLINE_SECS: u64 = 60;

fn parse_deadline(attr: TokenStream) -> syn::Result<u64> {
    if attr.is_empty() {
        return Ok(DEFAULT_DEADLINE_SECS);
    }
    let lit: LitInt = syn::parse(attr)?;
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new_spanned(lit, "deadline must be non-zero"));
    }
    Ok(secs)
}

fn retain_foreign_attrs(attrs: Vec<Attribute>, shadowed: &[&str]) -> Vec<Attribute> {
    attrs
        .into_iter()
        .filter(|attr| {
            let path: Vec<String> = attr
                .path()
                .segments
                .iter()
                .map(|seg| seg.ident.to_string())
                .collect();
            path != shadowed
        })
        .collect()
}

fn guard_with_watchdog(secs: u64, body: TokenStream2) -> TokenStream2 {
    quote! {
        let deadline = std::time::Duration::from_secs(#secs);
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                #body
            }));
            let _ = done_tx.send(outcome);
        });
        match done_rx.recv_timeout(deadline) {
            Ok(Ok(_)) => {}
            Ok(Err(panic)) => std::panic::resume_unwind(panic),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                panic!("test exceeded its {deadline:?} watchdog deadline")
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                panic!("watchdog thread exited without reporting an outcome")
            }
        }
    }
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = match parse_deadline(attr) {
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
            "timeout expects a synchronous test; use tokio_timeout_test for async",
        )
        .to_compile_error()
        .into();
    }

    let attrs = retain_foreign_attrs(attrs, &["test"]);
    let guarded = guard_with_watchdog(secs, quote!(#block));

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            #guarded
        }
    })
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = match parse_deadline(attr) {
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
            "tokio_timeout_test expects an async test function",
        )
        .to_compile_error()
        .into();
    }
    sig.asyncness = None;

    let attrs = retain_foreign_attrs(attrs, &["tokio", "test"]);
    let body = quote! {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build test runtime");
        runtime.block_on(async move #block);
    };
    let guarded = guard_with_watchdog(secs, body);

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            #guarded
        }
    })
}
