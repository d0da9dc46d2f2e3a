//! Builder-style entry point driving a whole conversion: parse, transform
//! data, emit source, export a standalone artifact. The CLI is a thin shell
//! over this, and a build script can call it the same way.

use std::path::{Path, PathBuf};

use crate::caffe::ir::Phase;
use crate::caffe::{parse_prototxt_file, read_caffemodel, transform, TransformedWeights};
use crate::error::{ImportError, Result};
use crate::export::StandaloneExporter;
use crate::formatter::format_tokens;
use crate::logger::init_log;
use crate::tf::freeze::{freezer_for, FreezeMode};

#[derive(Debug, Default)]
pub struct Converter {
    def_path: Option<PathBuf>,
    caffemodel: Option<PathBuf>,
    data_output: Option<PathBuf>,
    code_output: Option<PathBuf>,
    standalone_output: Option<PathBuf>,
    phase: Phase,
    freeze: FreezeMode,
    development: bool,
    cleanup_temp: bool,
}

impl Converter {
    pub fn new() -> Self {
        init_log().ok(); // Errors when initializing multiple times are ignored.
        Self::default()
    }

    /// Network definition (`.prototxt`) path. Required.
    pub fn definition(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.def_path = Some(path.as_ref().into());
        self
    }

    /// Stored weights (`.caffemodel`) path.
    pub fn caffemodel(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.caffemodel = Some(path.as_ref().into());
        self
    }

    /// Write transformed weights here.
    pub fn data_output_path(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.data_output = Some(path.as_ref().into());
        self
    }

    /// Write generated source here.
    pub fn code_output_path(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.code_output = Some(path.as_ref().into());
        self
    }

    /// Write the standalone graph artifact here.
    pub fn standalone_output_path(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.standalone_output = Some(path.as_ref().into());
        self
    }

    pub fn phase(&mut self, phase: Phase) -> &mut Self {
        self.phase = phase;
        self
    }

    pub fn freeze(&mut self, freeze: FreezeMode) -> &mut Self {
        self.freeze = freeze;
        self
    }

    /// Also write a debug dump of the parsed graph next to the first output.
    pub fn development(&mut self, development: bool) -> &mut Self {
        self.development = development;
        self
    }

    /// Delete the standalone export's scratch directory on success. Off by
    /// default; the intermediates are routinely useful for diagnosis.
    pub fn cleanup_temp(&mut self, cleanup: bool) -> &mut Self {
        self.cleanup_temp = cleanup;
        self
    }

    pub fn run(&self) -> Result<()> {
        let def_path = self
            .def_path
            .as_ref()
            .ok_or_else(|| ImportError::Parse("no definition file given".into()))?;
        let primary_output = self
            .data_output
            .as_ref()
            .or(self.code_output.as_ref())
            .or(self.standalone_output.as_ref())
            .ok_or_else(|| ImportError::Parse("no output path specified".into()))?;

        let graph = parse_prototxt_file(def_path, self.phase)?;

        if self.development {
            let dump = primary_output.with_extension("graph.json");
            let rendered = serde_json::to_string_pretty(&graph)
                .map_err(|e| ImportError::Parse(format!("cannot render graph dump: {e}")))?;
            std::fs::write(&dump, rendered)?;
            log::debug!("Graph dump written: {}", dump.display());
        }

        let transformed = self.transform_data(&graph)?;

        if let Some(path) = &self.data_output {
            let transformed = transformed.as_ref().ok_or_else(|| {
                ImportError::Parse("data output requires a caffemodel".into())
            })?;
            log::info!("Saving data...");
            transformed.save(path)?;
        }

        if let Some(path) = &self.code_output {
            log::info!("Saving source...");
            let source = format_tokens(graph.into_tf()?.codegen()?);
            let header = format!("// Generated from {:?} by caffe-import\n\n", def_path);
            std::fs::write(path, header + &source)?;
        }

        if let Some(path) = &self.standalone_output {
            let mut exporter = StandaloneExporter::new(&graph, path)
                .with_cleanup_temp(self.cleanup_temp);
            if let Some(data_path) = &self.data_output {
                exporter = exporter.with_data_artifact(data_path);
            } else if let Some(transformed) = &transformed {
                exporter = exporter.with_transformed(transformed);
            }
            if let Some(code_path) = &self.code_output {
                exporter = exporter.with_code_artifact(code_path);
            }
            if let Some(freezer) = freezer_for(self.freeze) {
                exporter = exporter.with_freezer(freezer);
            }
            exporter.run()?;
        }

        log::info!("Done.");
        Ok(())
    }

    /// Weights are only converted when an artifact will consume them.
    fn transform_data(
        &self,
        graph: &crate::caffe::ir::CaffeGraph,
    ) -> Result<Option<TransformedWeights>> {
        if self.data_output.is_none() && self.standalone_output.is_none() {
            return Ok(None);
        }
        match &self.caffemodel {
            None => Ok(None),
            Some(path) => {
                log::info!("Converting data...");
                let blob = read_caffemodel(path)?;
                Ok(Some(transform(graph, &blob)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_to_run_without_any_output() {
        let mut converter = Converter::default();
        converter.definition("net.prototxt");
        assert!(matches!(
            converter.run(),
            Err(ImportError::Parse(msg)) if msg.contains("output")
        ));
    }

    #[test]
    fn refuses_to_run_without_a_definition() {
        let mut converter = Converter::default();
        converter.code_output_path("out.rs");
        assert!(matches!(converter.run(), Err(ImportError::Parse(_))));
    }
}
