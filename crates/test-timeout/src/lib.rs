//! Test attributes that fail a test instead of hanging it.
//!
//! `#[test_timeout::tokio_timeout_test]` runs an async test body on a fresh
//! current-thread runtime; `#[test_timeout::timeout]` guards a synchronous
//! test. Both accept an optional timeout in seconds. The async form also
//! accepts `paused`, which starts the tokio clock paused so timers (reconnect
//! delays, sleeps) auto-advance whenever the runtime is idle. Crates using
//! `paused` need tokio's `test-util` feature.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::{Parse, ParseStream, Parser};
use syn::punctuated::Punctuated;
use syn::{Attribute, Ident, ItemFn, LitInt, Token};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Default)]
struct TimeoutArgs {
    secs: Option<u64>,
    paused: bool,
}

impl TimeoutArgs {
    fn secs(&self) -> u64 {
        self.secs.unwrap_or(DEFAULT_TIMEOUT_SECS)
    }
}

enum TimeoutArg {
    Secs(LitInt),
    Flag(Ident),
}

impl Parse for TimeoutArg {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if input.peek(LitInt) {
            input.parse().map(TimeoutArg::Secs)
        } else {
            input.parse().map(TimeoutArg::Flag)
        }
    }
}

fn parse_args(attr: TokenStream, allow_paused: bool) -> syn::Result<TimeoutArgs> {
    let parsed = Punctuated::<TimeoutArg, Token![,]>::parse_terminated.parse(attr)?;
    let mut args = TimeoutArgs::default();
    for arg in parsed {
        match arg {
            TimeoutArg::Secs(lit) => {
                let secs: u64 = lit.base10_parse()?;
                if secs == 0 {
                    return Err(syn::Error::new_spanned(
                        lit,
                        "timeout must be greater than zero",
                    ));
                }
                args.secs = Some(secs);
            }
            TimeoutArg::Flag(ident) if ident == "paused" && allow_paused => args.paused = true,
            TimeoutArg::Flag(ident) => {
                return Err(syn::Error::new_spanned(
                    &ident,
                    format!("unsupported test-timeout option `{ident}`"),
                ));
            }
        }
    }
    Ok(args)
}

/// Wraps `body` (an expression producing the test's result) in a watchdog
/// thread that panics once `secs` elapse in wall-clock time.
fn guarded(secs: u64, body: TokenStream2) -> TokenStream2 {
    quote! {
        let timeout_duration = std::time::Duration::from_secs(#secs);
        let (sender, receiver) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| { #body }));
            let _ = sender.send(result);
        });
        match receiver.recv_timeout(timeout_duration) {
            Ok(Ok(_)) => {}
            Ok(Err(payload)) => std::panic::resume_unwind(payload),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                panic!("test thread failed before reporting result")
            }
        }
    }
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match parse_args(attr, true) {
        Ok(args) => args,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = match syn::parse::<ItemFn>(item) {
        Ok(item) => item,
        Err(err) => return err.to_compile_error().into(),
    };

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }
    sig.asyncness = None;

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_tokio_test_attribute(attr))
        .collect();

    let pause = if args.paused {
        quote! { builder.start_paused(true); }
    } else {
        quote! {}
    };
    let body = quote! {
        let mut builder = tokio::runtime::Builder::new_current_thread();
        builder.enable_all();
        #pause
        let runtime = builder.build().expect("failed to build Tokio runtime");
        runtime.block_on(async {
            tokio::time::timeout(timeout_duration, async move #block)
                .await
                .expect("test timed out");
        });
    };
    let guarded = guarded(args.secs(), body);

    TokenStream::from(quote! {
        #[test]
        #(#filtered_attrs)*
        #vis #sig {
            #guarded
        }
    })
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match parse_args(attr, false) {
        Ok(args) => args,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = match syn::parse::<ItemFn>(item) {
        Ok(item) => item,
        Err(err) => return err.to_compile_error().into(),
    };

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "timeout attribute expects a synchronous test function",
        )
        .to_compile_error()
        .into();
    }

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_attribute(attr))
        .collect();

    let guarded = guarded(args.secs(), quote! { #block });

    TokenStream::from(quote! {
        #[test]
        #(#filtered_attrs)*
        #vis #sig {
            #guarded
        }
    })
}

fn is_tokio_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!(
        (segments.next(), segments.next(), segments.next()),
        (Some(first), Some(second), None)
            if first.ident == "tokio" && second.ident == "test"
    )
}

fn is_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!((segments.next(), segments.next()), (Some(first), None) if first.ident == "test")
}
