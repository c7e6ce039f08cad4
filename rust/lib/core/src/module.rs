use axum::Router;

/// A service module mounted by a binary under `/{name}`.
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    fn routes(&self) -> Router;

    /// Permission strings the module's routes check, so operators can see
    /// what a token grant may name. Empty when the module checks nothing.
    fn permissions(&self) -> &'static [&'static str] {
        &[]
    }
}
