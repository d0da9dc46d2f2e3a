//! Standalone export: instantiate the builder result, load transformed
//! weights inside a session, checkpoint, serialize the graph and hand off to
//! the selected freeze capability. Runs as an explicit state machine so a
//! failure at any step leaves a diagnosable trail.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::caffe::ir::CaffeGraph;
use crate::caffe::TransformedWeights;
use crate::error::{ImportError, Result};
use crate::formatter::format_tokens;
use crate::tf::freeze::{FreezeContext, Freezer};
use crate::tf::{Placeholder, Session, TensorMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Initializing,
    DataReady,
    CodeReady,
    ClassLoaded,
    WeightsLoaded,
    Checkpointed,
    GraphWritten,
    Frozen,
    Done,
    Failed,
}

/// Orchestrates steps 1-7 of a standalone export. Owns the execution
/// session for the whole run and releases it on every exit path.
pub struct StandaloneExporter<'a> {
    graph: &'a CaffeGraph,
    standalone_path: PathBuf,
    /// Transformed-weights artifact written earlier in this run, if any.
    data_artifact: Option<PathBuf>,
    /// Generated-source artifact written earlier in this run, if any.
    code_artifact: Option<PathBuf>,
    /// Weights to materialize into a default data artifact when none was
    /// written yet.
    transformed: Option<&'a TransformedWeights>,
    freezer: Option<Box<dyn Freezer>>,
    cleanup_temp: bool,
    state: ExportState,
}

impl<'a> StandaloneExporter<'a> {
    pub fn new(graph: &'a CaffeGraph, standalone_path: impl Into<PathBuf>) -> Self {
        Self {
            graph,
            standalone_path: standalone_path.into(),
            data_artifact: None,
            code_artifact: None,
            transformed: None,
            freezer: None,
            cleanup_temp: false,
            state: ExportState::Initializing,
        }
    }

    pub fn with_data_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_artifact = Some(path.into());
        self
    }

    pub fn with_code_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.code_artifact = Some(path.into());
        self
    }

    pub fn with_transformed(mut self, transformed: &'a TransformedWeights) -> Self {
        self.transformed = Some(transformed);
        self
    }

    pub fn with_freezer(mut self, freezer: Box<dyn Freezer>) -> Self {
        self.freezer = Some(freezer);
        self
    }

    /// Whether intermediate artifacts are deleted after a successful run.
    /// Off by default: they are routinely useful for diagnosis.
    pub fn with_cleanup_temp(mut self, cleanup: bool) -> Self {
        self.cleanup_temp = cleanup;
        self
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn run(&mut self) -> Result<()> {
        match self.run_steps() {
            Ok(()) => {
                self.set_state(ExportState::Done);
                Ok(())
            }
            Err(err) => {
                // Intermediate files are deliberately left in place.
                self.set_state(ExportState::Failed);
                Err(err)
            }
        }
    }

    fn run_steps(&mut self) -> Result<()> {
        let temp_dir = self.temp_dir()?;
        let stem = self
            .standalone_path
            .file_stem()
            .ok_or_else(|| {
                ImportError::CodeLoad(format!(
                    "standalone path `{}` has no file name",
                    self.standalone_path.display()
                ))
            })?
            .to_string_lossy()
            .to_string();

        // Step 1: default artifacts for anything the caller did not produce.
        let data_path = match &self.data_artifact {
            Some(path) => path.clone(),
            None => {
                let transformed = self.transformed.ok_or_else(|| {
                    ImportError::WeightLoad(self.graph.name.clone())
                })?;
                let path = temp_dir.join(format!("{stem}.npz"));
                transformed.save(&path)?;
                path
            }
        };
        self.set_state(ExportState::DataReady);

        if self.code_artifact.is_none() {
            let path = temp_dir.join(format!("{stem}.rs"));
            let source = format_tokens(self.graph.into_tf()?.codegen()?);
            std::fs::write(&path, source)?;
            self.code_artifact = Some(path);
        }
        self.set_state(ExportState::CodeReady);

        let tf = self.graph.into_tf()?;

        // Steps 2-3: materialize the class from the builder result, bound to
        // a placeholder of the input node's declared shape.
        let input_node = self.graph.input_node();
        let inputs: TensorMap =
            HashMap::from([(input_node.name.clone(), Placeholder::new(input_node.shape()))]);
        let net = tf.build_network(&inputs)?;
        self.set_state(ExportState::ClassLoaded);

        let mut session = Session::new();
        let result = self.drive_session(&net, &mut session, &data_path, &temp_dir, &stem);
        session.close();
        result?;

        if self.cleanup_temp {
            std::fs::remove_dir_all(&temp_dir)?;
        }
        Ok(())
    }

    /// Steps 4-6, with the session scoped by the caller.
    fn drive_session(
        &mut self,
        net: &crate::tf::Network,
        session: &mut Session,
        data_path: &Path,
        temp_dir: &Path,
        stem: &str,
    ) -> Result<()> {
        net.load(data_path, session)?;
        self.set_state(ExportState::WeightsLoaded);

        let checkpoint_path = temp_dir.join(format!("{stem}.ckpt"));
        session.save_checkpoint(&checkpoint_path)?;
        self.set_state(ExportState::Checkpointed);

        log::info!("Writing graph definition: {}", self.standalone_path.display());
        net.graph_def().save_to(&self.standalone_path)?;
        self.set_state(ExportState::GraphWritten);

        if let Some(freezer) = &self.freezer {
            let output_node = net.output_names().last().copied().ok_or_else(|| {
                ImportError::CodeLoad("network has no output node".into())
            })?.to_string();
            log::info!("Saving standalone model with `{}`", freezer.name());
            freezer.freeze(&FreezeContext {
                graph_def: net.graph_def(),
                session,
                checkpoint_path: &checkpoint_path,
                output_node: &output_node,
                standalone_path: &self.standalone_path,
            })?;
            self.set_state(ExportState::Frozen);
        }
        Ok(())
    }

    /// Hidden scratch directory beside the standalone output.
    fn temp_dir(&self) -> Result<PathBuf> {
        let parent = self.standalone_path.parent().unwrap_or_else(|| Path::new("."));
        let dir = parent.join(".tmp");
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn set_state(&mut self, state: ExportState) {
        log::debug!("export state: {:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caffe::ir::Phase;
    use crate::caffe::{parse_prototxt, transform, WeightBlob};
    use ndarray::ArrayD;

    const NET: &str = r#"
        name: "Scenario"
        layer { name: "data" type: "Input" top: "data"
                input_param { shape { dim: 1 dim: 3 dim: 8 dim: 8 } } }
        layer { name: "conv1" type: "Convolution" bottom: "data" top: "conv1"
                convolution_param { num_output: 8 kernel_size: 3 } }
        layer { name: "prob" type: "Softmax" bottom: "conv1" top: "prob" }
    "#;

    fn fixtures() -> (CaffeGraph, TransformedWeights) {
        let graph = parse_prototxt(NET, Phase::Test).unwrap();
        let mut blob = WeightBlob::default();
        blob.insert(
            "conv1".into(),
            vec![
                ArrayD::from_shape_vec(vec![8, 3, 3, 3], vec![0.5; 8 * 3 * 3 * 3]).unwrap(),
                ArrayD::from_shape_vec(vec![8], vec![0.0; 8]).unwrap(),
            ],
        );
        let transformed = transform(&graph, &blob).unwrap();
        (graph, transformed)
    }

    struct MarkerFreezer {
        fail: bool,
    }

    impl Freezer for MarkerFreezer {
        fn name(&self) -> &'static str {
            "marker"
        }

        fn freeze(&self, ctx: &FreezeContext<'_>) -> Result<()> {
            if self.fail {
                return Err(ImportError::Freeze {
                    op: "marker".into(),
                    reason: "injected failure".into(),
                });
            }
            std::fs::write(ctx.standalone_path.with_extension("marker"), "ok")?;
            Ok(())
        }
    }

    #[test]
    fn walks_the_state_machine_to_done() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("scenario.graph");
        let (graph, transformed) = fixtures();

        let mut exporter = StandaloneExporter::new(&graph, &out)
            .with_transformed(&transformed)
            .with_freezer(Box::new(MarkerFreezer { fail: false }));
        exporter.run().unwrap();

        assert_eq!(exporter.state(), ExportState::Done);
        assert!(out.exists());
        assert!(out.with_extension("marker").exists());
        // Default intermediate artifacts live in the hidden scratch dir and
        // survive the run.
        let tmp = dir.path().join(".tmp");
        assert!(tmp.join("scenario.npz").exists());
        assert!(tmp.join("scenario.rs").exists());
        assert!(tmp.join("scenario.ckpt").exists());
    }

    #[test]
    fn freezer_failure_lands_in_failed_with_artifacts_kept() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("scenario.graph");
        let (graph, transformed) = fixtures();

        let mut exporter = StandaloneExporter::new(&graph, &out)
            .with_transformed(&transformed)
            .with_freezer(Box::new(MarkerFreezer { fail: true }));
        assert!(exporter.run().is_err());
        assert_eq!(exporter.state(), ExportState::Failed);
        // The raw graph was written before the freeze step failed and is
        // left in place for diagnosis.
        assert!(out.exists());
        assert!(dir.path().join(".tmp").join("scenario.ckpt").exists());
    }

    #[test]
    fn missing_weights_fail_before_any_session_work() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("scenario.graph");
        let (graph, _) = fixtures();

        let mut exporter = StandaloneExporter::new(&graph, &out);
        assert!(matches!(exporter.run(), Err(ImportError::WeightLoad(_))));
        assert_eq!(exporter.state(), ExportState::Failed);
    }

    #[test]
    fn cleanup_is_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("scenario.graph");
        let (graph, transformed) = fixtures();

        let mut exporter = StandaloneExporter::new(&graph, &out)
            .with_transformed(&transformed)
            .with_cleanup_temp(true);
        exporter.run().unwrap();
        assert!(!dir.path().join(".tmp").exists());
        assert!(out.exists());
    }
}
