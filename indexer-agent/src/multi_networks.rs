//! Multi-network fan-out
//!
//! The agent runs the same reconciliation logic independently for every
//! protocol network it serves. `MultiNetworks<T>` holds one item per
//! network, keyed by the network identifier, and provides the aligned
//! map/zip operations the reconcilers are written against.
//!
//! Alignment is strict: two per-network maps that do not cover the same
//! identifiers indicate a wiring bug, not a runtime condition, and zipping
//! them is an error.

use std::collections::BTreeMap;
use std::future::Future;

use indexer_core::{IndexerError, IndexerResult};

/// Values keyed by network identifier
pub type NetworkMapped<T> = BTreeMap<String, T>;

/// One item per protocol network, keyed by identity
pub struct MultiNetworks<T> {
    items: BTreeMap<String, T>,
}

impl<T> MultiNetworks<T> {
    /// Build from items and an identity function
    ///
    /// Duplicate identities are a fatal configuration error.
    pub fn new(items: Vec<T>, identity: impl Fn(&T) -> String) -> IndexerResult<Self> {
        let mut map = BTreeMap::new();
        for item in items {
            let id = identity(&item);
            if map.insert(id.clone(), item).is_some() {
                return Err(IndexerError::Configuration(format!(
                    "duplicate network identifier: {}",
                    id
                )));
            }
        }
        Ok(Self { items: map })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Network identifiers, in stable order
    pub fn ids(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &T)> {
        self.items.iter()
    }

    /// Run `f` for every network concurrently, collecting results by id
    ///
    /// Any failure fails the whole map; callers decide whether to recover.
    pub async fn map<'a, R, F, Fut>(&'a self, f: F) -> IndexerResult<NetworkMapped<R>>
    where
        F: Fn(&'a str, &'a T) -> Fut,
        Fut: Future<Output = IndexerResult<R>> + 'a,
    {
        let results = futures::future::try_join_all(self.items.iter().map(|(id, item)| {
            let fut = f(id.as_str(), item);
            async move { fut.await.map(|r| (id.clone(), r)) }
        }))
        .await?;
        Ok(results.into_iter().collect())
    }

    /// Align two per-network maps into one; missing ids are fatal
    pub fn zip<A, B>(
        &self,
        a: NetworkMapped<A>,
        b: NetworkMapped<B>,
    ) -> IndexerResult<NetworkMapped<(A, B)>> {
        let mut a = a;
        let mut b = b;
        let mut out = BTreeMap::new();
        for id in self.items.keys() {
            let va = a.remove(id).ok_or_else(|| missing(id, "first"))?;
            let vb = b.remove(id).ok_or_else(|| missing(id, "second"))?;
            out.insert(id.clone(), (va, vb));
        }
        if let Some(id) = a.keys().chain(b.keys()).next() {
            return Err(unknown(id));
        }
        Ok(out)
    }

    /// Align four per-network maps into one; missing ids are fatal
    pub fn zip4<A, B, C, D>(
        &self,
        a: NetworkMapped<A>,
        b: NetworkMapped<B>,
        c: NetworkMapped<C>,
        d: NetworkMapped<D>,
    ) -> IndexerResult<NetworkMapped<(A, B, C, D)>> {
        let ab = self.zip(a, b)?;
        let cd = self.zip(c, d)?;
        let zipped = self.zip(ab, cd)?;
        Ok(zipped
            .into_iter()
            .map(|(id, ((a, b), (c, d)))| (id, (a, b, c, d)))
            .collect())
    }

    /// Join a per-network map with the items and apply `f` per network
    pub async fn map_network_mapped<'a, X, R, F, Fut>(
        &'a self,
        input: NetworkMapped<X>,
        f: F,
    ) -> IndexerResult<NetworkMapped<R>>
    where
        X: Send + 'a,
        F: Fn(&'a T, X) -> Fut,
        Fut: Future<Output = IndexerResult<R>> + 'a,
    {
        let mut input = input;
        let mut paired = Vec::with_capacity(self.items.len());
        for (id, item) in self.items.iter() {
            let value = input
                .remove(id)
                .ok_or_else(|| missing(id, "network-mapped input"))?;
            paired.push((id, item, value));
        }
        if let Some(id) = input.keys().next() {
            return Err(unknown(id));
        }
        let results = futures::future::try_join_all(paired.into_iter().map(|(id, item, value)| {
            let fut = f(item, value);
            async move { fut.await.map(|r| (id.clone(), r)) }
        }))
        .await?;
        Ok(results.into_iter().collect())
    }
}

fn missing(id: &str, which: &str) -> IndexerError {
    IndexerError::NetworkMismatch(format!("{} input is missing network {}", which, id))
}

fn unknown(id: &str) -> IndexerError {
    IndexerError::NetworkMismatch(format!("input contains unknown network {}", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Net {
        id: &'static str,
        value: u32,
    }

    fn networks() -> MultiNetworks<Net> {
        MultiNetworks::new(
            vec![
                Net {
                    id: "eip155:1",
                    value: 10,
                },
                Net {
                    id: "eip155:42161",
                    value: 20,
                },
            ],
            |n| n.id.to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_duplicate_identity_is_fatal() {
        let result = MultiNetworks::new(
            vec![Net { id: "x", value: 1 }, Net { id: "x", value: 2 }],
            |n| n.id.to_string(),
        );
        assert!(matches!(result, Err(IndexerError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_map_collects_by_identity() {
        let nets = networks();
        let doubled = nets
            .map(|_, n| async move { Ok(n.value * 2) })
            .await
            .unwrap();
        assert_eq!(doubled["eip155:1"], 20);
        assert_eq!(doubled["eip155:42161"], 40);
    }

    #[tokio::test]
    async fn test_map_propagates_errors() {
        let nets = networks();
        let result: IndexerResult<NetworkMapped<u32>> = nets
            .map(|id, _| {
                let id = id.to_string();
                async move { Err(IndexerError::NetworkQuery(id)) }
            })
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_zip_requires_full_coverage() {
        let nets = networks();
        let mut a = NetworkMapped::new();
        a.insert("eip155:1".to_string(), 1u32);
        a.insert("eip155:42161".to_string(), 2u32);
        let mut b = NetworkMapped::new();
        b.insert("eip155:1".to_string(), "one");

        let result = nets.zip(a, b);
        assert!(matches!(result, Err(IndexerError::NetworkMismatch(_))));
    }

    #[test]
    fn test_zip4_aligns_by_identity() {
        let nets = networks();
        let fill = |v: u32| -> NetworkMapped<u32> {
            nets.ids().into_iter().map(|id| (id, v)).collect()
        };
        let zipped = nets.zip4(fill(1), fill(2), fill(3), fill(4)).unwrap();
        assert_eq!(zipped["eip155:1"], (1, 2, 3, 4));
        assert_eq!(zipped["eip155:42161"], (1, 2, 3, 4));
    }

    #[tokio::test]
    async fn test_map_network_mapped() {
        let nets = networks();
        let input: NetworkMapped<u32> = nets.ids().into_iter().map(|id| (id, 5)).collect();
        let out = nets
            .map_network_mapped(input, |n, x| async move { Ok(n.value + x) })
            .await
            .unwrap();
        assert_eq!(out["eip155:1"], 15);
        assert_eq!(out["eip155:42161"], 25);
    }
}
