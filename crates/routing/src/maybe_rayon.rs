/// Compatibility layer for rayon/sequential execution.
///
/// With the `parallel` feature enabled this re-exports rayon's parallel
/// iterators. Without it (single-threaded or WASM builds) the sequential
/// stand-ins below implement the same API surface the routers use, so the
/// per-batch kernels compile unchanged.
#[cfg(feature = "parallel")]
pub use rayon::prelude::*;

#[cfg(not(feature = "parallel"))]
mod sequential {
    /// Sequential stand-in for `rayon::prelude::IntoParallelRefIterator`.
    ///
    /// Resolves `.par_iter()` to `.into_iter()` on a shared reference, so
    /// the rest of the iterator chain (`.map()`, `.collect()`, ...) falls
    /// back to the standard `Iterator` methods.
    pub trait IntoParallelRefIterator<'data> {
        type Iter;
        type Item;
        fn par_iter(&'data self) -> Self::Iter;
    }

    impl<'data, I: 'data + ?Sized> IntoParallelRefIterator<'data> for I
    where
        &'data I: IntoIterator,
    {
        type Iter = <&'data I as IntoIterator>::IntoIter;
        type Item = <&'data I as IntoIterator>::Item;
        fn par_iter(&'data self) -> Self::Iter {
            self.into_iter()
        }
    }
}

#[cfg(not(feature = "parallel"))]
pub use sequential::*;
