use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

use caffe_import::caffe::ir::Phase;
use caffe_import::tf::freeze::FreezeMode;
use caffe_import::Converter;

/// Convert Caffe models to TensorFlow-style graphs.
#[derive(Parser, Debug)]
#[command(name = "caffe-import", version, about)]
struct Args {
    /// Model definition (.prototxt) path
    def_path: PathBuf,

    /// Model data (.caffemodel) path
    #[arg(long)]
    caffemodel: Option<PathBuf>,

    /// Converted data output path
    #[arg(long)]
    data_output_path: Option<PathBuf>,

    /// Save generated source to this path
    #[arg(long)]
    code_output_path: Option<PathBuf>,

    /// Save a generated standalone graph to this path
    #[arg(long)]
    standalone_output_path: Option<PathBuf>,

    /// The phase to convert: test (default) or train
    #[arg(short, long, default_value = "test")]
    phase: String,

    /// Freeze option for inference: none (default), freeze_graph or
    /// optimize_for_inference
    #[arg(long, default_value = "none")]
    freeze: String,
}

fn fatal_error(msg: impl Display) -> ! {
    eprintln!("Error encountered: {msg}");
    std::process::exit(1);
}

fn validate_arguments(args: &Args) {
    if args.data_output_path.is_some() && args.caffemodel.is_none() {
        fatal_error("No input data path provided.");
    }
    if args.caffemodel.is_some()
        && args.data_output_path.is_none()
        && args.standalone_output_path.is_none()
    {
        fatal_error("No output data path provided.");
    }
    if args.code_output_path.is_none()
        && args.data_output_path.is_none()
        && args.standalone_output_path.is_none()
    {
        fatal_error("No output path specified.");
    }
}

fn main() {
    let args = Args::parse();
    validate_arguments(&args);

    let phase = Phase::from_str(&args.phase)
        .unwrap_or_else(|_| fatal_error(format!("unknown phase `{}`", args.phase)));
    let freeze = FreezeMode::from_str(&args.freeze)
        .unwrap_or_else(|_| fatal_error(format!("unknown freeze mode `{}`", args.freeze)));

    let mut converter = Converter::new();
    converter.definition(&args.def_path).phase(phase).freeze(freeze);
    if let Some(path) = &args.caffemodel {
        converter.caffemodel(path);
    }
    if let Some(path) = &args.data_output_path {
        converter.data_output_path(path);
    }
    if let Some(path) = &args.code_output_path {
        converter.code_output_path(path);
    }
    if let Some(path) = &args.standalone_output_path {
        converter.standalone_output_path(path);
    }

    if let Err(err) = converter.run() {
        fatal_error(err);
    }
}
