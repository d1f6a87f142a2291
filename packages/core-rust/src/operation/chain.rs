//! Success chaining between operations.

use super::{AsyncOperation, ListenerId, Operation};

/// Runs `on_success` against `target` once `source` completes successfully.
///
/// If `source` fails, its cause and any partial result are forwarded to
/// `target` and `on_success` is never called. The partial result is
/// converted with `Into`; use [`chain_on_success_with`] when the types are
/// unrelated.
///
/// ```
/// use busline_core::{chain_on_success, AsyncOperation, Operation};
///
/// let fetch: AsyncOperation<String> = AsyncOperation::new("fetch", "");
/// let stored: AsyncOperation<String> = AsyncOperation::new("store", "");
/// chain_on_success(&fetch, &stored, |src, dst| {
///     if let Some(body) = src.result() {
///         dst.set_result(body.to_uppercase());
///     }
/// });
///
/// fetch.set_result("ok".to_string());
/// assert_eq!(stored.result().as_deref(), Some("OK"));
/// ```
pub fn chain_on_success<S, T, F>(
    source: &AsyncOperation<S>,
    target: &AsyncOperation<T>,
    on_success: F,
) -> ListenerId
where
    S: Clone + Send + Into<T> + 'static,
    T: Clone + Send + 'static,
    F: FnOnce(&AsyncOperation<S>, &AsyncOperation<T>) + Send + 'static,
{
    chain_on_success_with(source, target, Into::into, on_success)
}

/// Like [`chain_on_success`], converting a forwarded partial result with
/// `map_partial`.
pub fn chain_on_success_with<S, T, M, F>(
    source: &AsyncOperation<S>,
    target: &AsyncOperation<T>,
    map_partial: M,
    on_success: F,
) -> ListenerId
where
    S: Clone + Send + 'static,
    T: Clone + Send + 'static,
    M: FnOnce(S) -> T + Send + 'static,
    F: FnOnce(&AsyncOperation<S>, &AsyncOperation<T>) + Send + 'static,
{
    let target = target.clone();
    source.register(move |source| {
        if source.is_success() {
            on_success(source, &target);
            return;
        }
        if let Some(cause) = source.cause() {
            target.set_failure(cause, source.result().map(map_partial));
        }
    })
}
