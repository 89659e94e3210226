//! Policy overlay.
//!
//! A chain of fragments is folded into a single accumulator, most specific
//! first. What "folding" means is up to the fragment type: address settings
//! only fill fields that are still unset, role sets take the union.

/// A policy fragment that can be folded with less specific fragments.
pub trait Mergeable: Clone + Default + Send + Sync + 'static {
    /// Fully populated value handed to readers.
    type Resolved: Clone + Send + Sync + 'static;

    /// Fold `less_specific` into `self`.
    ///
    /// `less_specific` is read by reference and copied where needed, so
    /// mutating it afterwards never affects `self`.
    fn merge(&mut self, less_specific: &Self);

    /// Finish the accumulator, supplying hard-coded defaults.
    fn resolve(self) -> Self::Resolved;
}

/// Fold `fragments` (most specific first) and then `fallback` into a fresh
/// accumulator and resolve it.
pub fn overlay<'a, T, I>(fragments: I, fallback: Option<&T>) -> T::Resolved
where
    T: Mergeable + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut accumulator = T::default();
    for fragment in fragments {
        accumulator.merge(fragment);
    }
    if let Some(fallback) = fallback {
        accumulator.merge(fallback);
    }
    accumulator.resolve()
}

/// Copy `source` into `target` only if `target` is unset.
pub(crate) fn fill<T: Clone>(target: &mut Option<T>, source: &Option<T>) {
    if target.is_none() {
        target.clone_from(source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_keeps_existing_value() {
        let mut target = Some(1);
        fill(&mut target, &Some(2));
        assert_eq!(target, Some(1));

        let mut empty: Option<i32> = None;
        fill(&mut empty, &Some(2));
        assert_eq!(empty, Some(2));

        fill(&mut empty, &None);
        assert_eq!(empty, Some(2));
    }
}
