//! Proc macros for kubeprobe
//!
//! Provides the `#[kubeprobe::test]` attribute for cluster verification tests.

use proc_macro::TokenStream;
use quote::quote;
use syn::{FnArg, ItemFn, Pat, PatType, ReturnType};

/// Attribute macro for tests that run against a live cluster.
///
/// Connects a `Context` from the environment (`KUBECONFIG_FILE`,
/// `KUBEPROBE_NAMESPACE`, ...) and injects it as `ctx`.
///
/// # Example
///
/// ```ignore
/// use kubeprobe::{Context, WorkloadKind};
///
/// #[kubeprobe::test]
/// async fn cassandra_scales_to_three(ctx: Context) {
///     let sts = ctx
///         .set_replicas(WorkloadKind::StatefulSet, "cassandra", "cassandra-ns", 3, true)
///         .await
///         .unwrap();
///     assert_eq!(sts.ready_replicas, 3);
/// }
/// ```
///
/// # With Result Return Type
///
/// ```ignore
/// #[kubeprobe::test]
/// async fn pod_lookup(ctx: Context) -> Result<(), kubeprobe::ProbeError> {
///     ctx.get_pod("elasticsearch-0", "elasticsearch-ns").await?;
///     Ok(())
/// }
/// ```
///
/// # What it does
///
/// 1. Initialise test logging (`RUST_LOG`)
/// 2. Build a `Context` with `Context::from_env`
/// 3. Run the test body with it
/// 4. On failure, report which cluster and namespace the test ran against
#[proc_macro_attribute]
pub fn test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = syn::parse_macro_input!(item as ItemFn);
    test_impl(&input_fn).into()
}

/// Check if a function has a parameter named "ctx"
fn has_ctx_param(input_fn: &ItemFn) -> bool {
    input_fn.sig.inputs.iter().any(|arg| {
        if let FnArg::Typed(PatType { pat, .. }) = arg {
            if let Pat::Ident(ident) = pat.as_ref() {
                return ident.ident == "ctx";
            }
        }
        false
    })
}

fn has_result_return(input_fn: &ItemFn) -> bool {
    matches!(&input_fn.sig.output, ReturnType::Type(..))
}

/// Expansion, on `proc_macro2` types so it can be unit tested
fn test_impl(input_fn: &ItemFn) -> proc_macro2::TokenStream {
    let fn_name = &input_fn.sig.ident;
    let fn_block = &input_fn.block;
    let fn_vis = &input_fn.vis;
    let fn_attrs = &input_fn.attrs;

    if !has_ctx_param(input_fn) {
        return quote! {
            #(#fn_attrs)*
            #[tokio::test]
            #fn_vis async fn #fn_name() {
                kubeprobe::telemetry::init_test_logging();
                #fn_block
            }
        };
    }

    // The body keeps its own signature so `?` resolves against the declared error type
    let inputs = &input_fn.sig.inputs;
    let output = &input_fn.sig.output;
    let test_execution = if has_result_return(input_fn) {
        quote! {
            if let Err(e) = test_body(ctx).await {
                panic!("test returned an error: {}", e);
            }
        }
    } else {
        quote! {
            test_body(ctx).await;
        }
    };

    quote! {
        #(#fn_attrs)*
        #[tokio::test]
        #fn_vis async fn #fn_name() {
            use futures::FutureExt;
            use std::panic::AssertUnwindSafe;

            kubeprobe::telemetry::init_test_logging();

            let ctx = kubeprobe::Context::from_env().await
                .unwrap_or_else(|e| panic!("Failed to create Context: {}", e));
            let endpoint = ctx.endpoint();
            let namespace = ctx.namespace().to_string();

            async fn test_body(#inputs) #output #fn_block

            let result = AssertUnwindSafe(async move {
                #test_execution
            })
            .catch_unwind()
            .await;

            if let Err(panic_info) = result {
                eprintln!(
                    "[kubeprobe] test failed against {} (namespace {})",
                    endpoint, namespace
                );
                std::panic::resume_unwind(panic_info);
            }
        }
    }
}
