// Copyright (c) Simcore Contributors
// SPDX-License-Identifier: Apache-2.0

//! An in-memory stand-in for a real `SimBasis` kernel. It keeps just enough
//! state to make the dispatch layer's tests meaningful (dense/sparse storage,
//! an extremely naive recommendation scorer, and a textual dump format) while
//! staying well clear of anything resembling real similarity search.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use simcore_kernel_iface::{
    BasisConfig, KernelError, ListenerScope, SimBasisFactory, SimBasisKernel, SparsePairs,
};
use simcore_notifications::{KernelEvent, KernelEventNotifier};

#[derive(Default, Clone)]
struct VectorSetState {
    dense: BTreeMap<i64, Vec<f32>>,
    sparse: BTreeMap<i64, SparsePairs>,
}

#[derive(Clone)]
struct RecommendationState {
    funcscore: String,
}

pub struct MockKernel {
    coords: RwLock<Vec<String>>,
    vector_sets: DashMap<String, VectorSetState>,
    recommendations: DashMap<String, RecommendationState>,
    events: KernelEventNotifier,
}

impl MockKernel {
    pub fn new(coords: Vec<String>, events: KernelEventNotifier) -> Self {
        Self {
            coords: RwLock::new(coords),
            vector_sets: DashMap::new(),
            recommendations: DashMap::new(),
            events,
        }
    }

    fn rkey(src: &str, tgt: &str) -> String {
        format!("{src}_{tgt}")
    }

    fn require_set<'a>(
        &'a self,
        vkey: &str,
    ) -> Result<dashmap::mapref::one::Ref<'a, String, VectorSetState>, KernelError> {
        self.vector_sets
            .get(vkey)
            .ok_or_else(|| KernelError::Other(format!("no such vector set: {vkey}")))
    }
}

#[async_trait]
impl SimBasisKernel for MockKernel {
    async fn bsave(&self, path: &Path) -> Result<(), KernelError> {
        let mut rendered = String::new();
        rendered.push_str(&self.coords.read().join(","));
        rendered.push('\n');
        for entry in self.vector_sets.iter() {
            rendered.push_str("V ");
            rendered.push_str(entry.key());
            for (id, values) in &entry.dense {
                rendered.push_str(&format!(" {id}:{}", render_floats(values)));
            }
            rendered.push('\n');
        }
        for entry in self.recommendations.iter() {
            rendered.push_str("R ");
            rendered.push_str(entry.key());
            rendered.push_str(&format!(" {}", entry.funcscore));
            rendered.push('\n');
        }
        std::fs::write(path, rendered).map_err(|e| KernelError::Io(e.to_string()))
    }

    async fn brev(&self, base: Vec<String>) -> Result<(), KernelError> {
        *self.coords.write() = base;
        Ok(())
    }

    async fn bget(&self) -> Result<Vec<String>, KernelError> {
        Ok(self.coords.read().clone())
    }

    async fn vmk(&self, vkey: &str) -> Result<(), KernelError> {
        self.vector_sets
            .insert(vkey.to_string(), VectorSetState::default());
        Ok(())
    }

    async fn vdel(&self, vkey: &str) -> Result<(), KernelError> {
        self.vector_sets.remove(vkey);
        Ok(())
    }

    async fn vids(&self, vkey: &str) -> Result<Vec<i64>, KernelError> {
        Ok(self.require_set(vkey)?.dense.keys().copied().collect())
    }

    async fn vget(&self, vkey: &str, id: i64) -> Result<Vec<f32>, KernelError> {
        self.require_set(vkey)?
            .dense
            .get(&id)
            .cloned()
            .ok_or_else(|| KernelError::Other(format!("no such vector id: {id}")))
    }

    async fn vadd(&self, vkey: &str, id: i64, values: Vec<f32>) -> Result<(), KernelError> {
        self.vector_sets
            .get_mut(vkey)
            .ok_or_else(|| KernelError::Other(format!("no such vector set: {vkey}")))?
            .dense
            .entry(id)
            .and_modify(|existing| {
                for (slot, value) in existing.iter_mut().zip(values.iter()) {
                    *slot += value;
                }
            })
            .or_insert(values);
        Ok(())
    }

    async fn vset(&self, vkey: &str, id: i64, values: Vec<f32>) -> Result<(), KernelError> {
        self.vector_sets
            .get_mut(vkey)
            .ok_or_else(|| KernelError::Other(format!("no such vector set: {vkey}")))?
            .dense
            .insert(id, values);
        Ok(())
    }

    async fn vacc(&self, vkey: &str, id: i64, values: Vec<f32>) -> Result<(), KernelError> {
        self.vadd(vkey, id, values).await
    }

    async fn vrem(&self, vkey: &str, id: i64) -> Result<(), KernelError> {
        self.vector_sets
            .get_mut(vkey)
            .ok_or_else(|| KernelError::Other(format!("no such vector set: {vkey}")))?
            .dense
            .remove(&id);
        Ok(())
    }

    async fn iget(&self, vkey: &str, id: i64) -> Result<SparsePairs, KernelError> {
        self.require_set(vkey)?
            .sparse
            .get(&id)
            .cloned()
            .ok_or_else(|| KernelError::Other(format!("no such vector id: {id}")))
    }

    async fn iadd(&self, vkey: &str, id: i64, pairs: SparsePairs) -> Result<(), KernelError> {
        self.vector_sets
            .get_mut(vkey)
            .ok_or_else(|| KernelError::Other(format!("no such vector set: {vkey}")))?
            .sparse
            .entry(id)
            .or_default()
            .extend(pairs);
        Ok(())
    }

    async fn iset(&self, vkey: &str, id: i64, pairs: SparsePairs) -> Result<(), KernelError> {
        self.vector_sets
            .get_mut(vkey)
            .ok_or_else(|| KernelError::Other(format!("no such vector set: {vkey}")))?
            .sparse
            .insert(id, pairs);
        Ok(())
    }

    async fn iacc(&self, vkey: &str, id: i64, pairs: SparsePairs) -> Result<(), KernelError> {
        self.iadd(vkey, id, pairs).await
    }

    async fn rmk(&self, src: &str, tgt: &str, funcscore: &str) -> Result<(), KernelError> {
        self.recommendations.insert(
            Self::rkey(src, tgt),
            RecommendationState {
                funcscore: funcscore.to_string(),
            },
        );
        Ok(())
    }

    async fn rdel(&self, rkey: &str) -> Result<(), KernelError> {
        self.recommendations.remove(rkey);
        Ok(())
    }

    async fn rget(&self, src: &str, id: i64, tgt: &str) -> Result<Vec<String>, KernelError> {
        self.rrec(src, id, tgt)
            .await
            .map(|ids| ids.into_iter().map(|i| format!("{i}:1.0")).collect())
    }

    async fn rrec(&self, _src: &str, _id: i64, tgt: &str) -> Result<Vec<i64>, KernelError> {
        if !self.recommendations.contains_key(&Self::rkey(_src, tgt)) {
            return Err(KernelError::Other(format!(
                "no such recommendation: {}",
                Self::rkey(_src, tgt)
            )));
        }
        Ok(self.require_set(tgt)?.dense.keys().copied().collect())
    }

    async fn add_listener(&self, _scope: ListenerScope) -> Result<(), KernelError> {
        Ok(())
    }
}

fn render_floats(values: &[f32]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Builds `MockKernel` instances and knows how to (de)serialize the toy dump
/// format `bsave`/`load` use.
#[derive(Default)]
pub struct MockFactory;

#[async_trait]
impl SimBasisFactory for MockFactory {
    async fn create(
        &self,
        _bkey: &str,
        coords: Vec<String>,
        _config: BasisConfig,
        events: KernelEventNotifier,
    ) -> Result<Arc<dyn SimBasisKernel>, KernelError> {
        Ok(Arc::new(MockKernel::new(coords, events)))
    }

    async fn load(
        &self,
        bkey: &str,
        path: &Path,
        _config: BasisConfig,
        events: KernelEventNotifier,
    ) -> Result<(Arc<dyn SimBasisKernel>, Vec<String>), KernelError> {
        let contents = std::fs::read_to_string(path).map_err(|e| KernelError::Io(e.to_string()))?;
        let mut lines = contents.lines();
        let coords: Vec<String> = lines
            .next()
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        let kernel = MockKernel::new(coords.clone(), events.clone());
        for line in lines {
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("V") => {
                    let vkey = parts.next().unwrap_or_default().to_string();
                    let mut state = VectorSetState::default();
                    for tok in parts {
                        if let Some((id, values)) = tok.split_once(':') {
                            let id: i64 = id.parse().unwrap_or_default();
                            let values = values
                                .split(',')
                                .filter_map(|v| v.parse().ok())
                                .collect();
                            state.dense.insert(id, values);
                        }
                    }
                    kernel.vector_sets.insert(vkey.clone(), state);
                    let _ = events.notify(KernelEvent::VecSetAdded {
                        bkey: bkey.to_string(),
                        vkey,
                    });
                },
                Some("R") => {
                    let rkey = parts.next().unwrap_or_default().to_string();
                    let funcscore = parts.next().unwrap_or("cosine").to_string();
                    if let Some((from, to)) = rkey.split_once('_') {
                        kernel
                            .recommendations
                            .insert(rkey.clone(), RecommendationState { funcscore });
                        let _ = events.notify(KernelEvent::RecAdded {
                            bkey: bkey.to_string(),
                            from: from.to_string(),
                            to: to.to_string(),
                        });
                    }
                },
                _ => {},
            }
        }
        Ok((Arc::new(kernel), coords))
    }
}
