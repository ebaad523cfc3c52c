use std::path::{Path, PathBuf};

use clap::Parser;

use crate::units::Length;

#[derive(Parser, Debug)]
#[command(
    name = "pagemark",
    version,
    about = "Fill in the bibliography and paginated table of contents of a rendered HTML document"
)]
pub struct Cli {
    /// Rendered HTML document to post-process.
    pub input: PathBuf,

    /// Where to write the result; a `.pdf` extension prints through the browser.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Configuration file (defaults to `pagemark.toml` next to the input).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Page width, e.g. `8.5in`, `210mm` or plain pixels.
    #[arg(long)]
    pub width: Option<Length>,

    /// Page height, e.g. `11in`, `297mm` or plain pixels.
    #[arg(long)]
    pub height: Option<Length>,

    #[arg(long, default_value_t = false)]
    pub skip_bibliography: bool,

    #[arg(long, default_value_t = false)]
    pub skip_toc: bool,
}

impl Cli {
    pub fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => default_output_path(&self.input),
        }
    }

    pub fn wants_pdf(&self) -> bool {
        self.output_path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
    }
}

pub fn default_output_path(input: &Path) -> PathBuf {
    input.with_extension("out.html")
}
