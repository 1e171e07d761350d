// Copyright (c) Simcore Contributors
// SPDX-License-Identifier: Apache-2.0

//! An in-memory similarity engine's dispatch and coordination layer: a
//! typed key namespace over bases, vector sets and recommendation
//! relations; per-basis single-writer/shared-reader concurrency; cascading
//! lifecycle management; a one-way event bridge keeping the catalog in
//! sync with a kernel's internally materialized changes; and a periodic
//! snapshot scheduler.
//!
//! The numerical kernel itself (vector storage, similarity scoring,
//! neighbor-list maintenance) is an external collaborator described by
//! `simcore_kernel_iface::SimBasisKernel`. This crate only knows how to ask
//! for the work and how to tell when it failed.

pub mod catalog;
pub mod cron;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod listener;
pub mod metrics;
pub mod validator;

pub use catalog::{Kind, KeyCatalog};
pub use dispatcher::Engine;
pub use error::{EngineError, EngineResult};
pub use metrics::{Metrics, MetricsSnapshot};

#[cfg(test)]
mod integration {
    use std::sync::Arc;

    use simcore_config::EngineConfig;
    use simcore_kernel_iface::ListenerScope;
    use simcore_testkit::MockFactory;

    use super::*;

    fn test_engine() -> Arc<Engine> {
        let mut config = EngineConfig::default();
        config.savepath = std::env::temp_dir().join(format!(
            "simcore-test-{}",
            std::process::id()
        ));
        let _ = std::fs::create_dir_all(&config.savepath);
        Engine::new(config, Arc::new(MockFactory))
    }

    // S1
    #[tokio::test]
    async fn basis_creation_round_trips_coordinate_names() {
        let engine = test_engine();
        engine
            .bmk("b1", vec!["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(engine.blist(), vec!["b1".to_string()]);
        assert_eq!(
            engine.bget("b1").await.unwrap(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    // S2
    #[tokio::test]
    async fn dense_vector_write_then_read() {
        let engine = test_engine();
        engine
            .bmk("b1", vec!["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        engine.vmk("b1", "vs").await.unwrap();
        engine.vadd("vs", 1, vec![0.2, 0.3, 0.5]).unwrap();
        // vadd is fire-and-forget; give the writer a beat to apply it.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(engine.vget("vs", 1).await.unwrap(), vec![0.2, 0.3, 0.5]);
        assert_eq!(engine.vids("vs").await.unwrap(), vec![1]);
    }

    // S3
    #[tokio::test]
    async fn invalid_probability_and_id_are_rejected_synchronously() {
        let engine = test_engine();
        engine.bmk("b1", vec!["a".into(), "b".into(), "c".into()]).await.unwrap();
        engine.vmk("b1", "vs").await.unwrap();
        assert!(matches!(
            engine.vadd("vs", 1, vec![1.1, 0.0, 0.0]),
            Err(EngineError::InvalidProbability(_))
        ));
        assert!(matches!(
            engine.vadd("vs", 0, vec![0.5, 0.5, 0.0]),
            Err(EngineError::InvalidId(0))
        ));
    }

    // S4
    #[tokio::test]
    async fn deleting_a_recommendation_target_clears_rlist() {
        let engine = test_engine();
        engine.bmk("b1", vec!["a".into()]).await.unwrap();
        engine.vmk("b1", "src").await.unwrap();
        engine.vmk("b1", "tgt").await.unwrap();
        engine.rmk("src", "tgt", "cosine").await.unwrap();
        assert_eq!(engine.rlist("src").unwrap(), vec!["tgt".to_string()]);
        engine.del("tgt").await.unwrap();
        assert!(engine.rlist("src").unwrap().is_empty());
    }

    // S5
    #[tokio::test]
    async fn cross_basis_recommendation_rejected() {
        let engine = test_engine();
        engine.bmk("b1", vec!["a".into()]).await.unwrap();
        engine.bmk("b2", vec!["a".into()]).await.unwrap();
        engine.vmk("b1", "vs").await.unwrap();
        engine.vmk("b2", "u").await.unwrap();
        assert!(matches!(
            engine.rmk("vs", "u", "cosine").await,
            Err(EngineError::BasisMismatch { .. })
        ));
    }

    // S6
    #[tokio::test]
    async fn save_and_reload_reproduces_vector_state() {
        let mut config = EngineConfig::default();
        config.savepath = std::env::temp_dir().join(format!(
            "simcore-test-reload-{}",
            std::process::id()
        ));
        let _ = std::fs::create_dir_all(&config.savepath);

        let engine = Engine::new(config.clone(), Arc::new(MockFactory));
        engine.bmk("b1", vec!["a".into(), "b".into()]).await.unwrap();
        engine.vmk("b1", "vs").await.unwrap();
        engine.vadd("vs", 1, vec![0.4, 0.6]).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        engine.bsave("b1").await.unwrap();

        let fresh = Engine::new(config, Arc::new(MockFactory));
        fresh.load().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(fresh.blist(), vec!["b1".to_string()]);
        assert_eq!(fresh.vget("vs", 1).await.unwrap(), vec![0.4, 0.6]);
    }

    #[tokio::test]
    async fn startup_load_on_empty_directory_is_a_no_op() {
        let engine = test_engine();
        engine.load().await.unwrap();
        assert!(engine.blist().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_basis_cascades_and_tears_down_its_writer() {
        let engine = test_engine();
        engine.bmk("b1", vec!["a".into()]).await.unwrap();
        engine.vmk("b1", "src").await.unwrap();
        engine.vmk("b1", "tgt").await.unwrap();
        engine.rmk("src", "tgt", "cosine").await.unwrap();

        engine.del("b1").await.unwrap();
        assert!(engine.blist().is_empty());
        assert!(matches!(
            engine.vlist("b1"),
            Err(EngineError::UnknownEntry(_))
        ));
    }

    #[tokio::test]
    async fn listen_forwards_scope_to_the_kernel() {
        let engine = test_engine();
        engine.bmk("b1", vec!["a".into()]).await.unwrap();
        engine
            .listen("b1", ListenerScope::Basis)
            .await
            .unwrap();
    }
}
