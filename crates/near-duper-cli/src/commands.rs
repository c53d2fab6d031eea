use clap::{Args, Parser, Subcommand, ValueEnum};
use near_duper_core::{ImageAlgorithm, SearchType};

#[derive(Debug, Parser)]
#[command(name = "near-duper")]
#[command(about = "Find duplicate and near-duplicate files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Find duplicate clusters under the given or configured paths
    Find(FindArgs),
    /// Print configuration values
    PrintConfig,
    /// Show what the signature index holds
    IndexStats {
        /// SQLite index file; defaults to the configured one
        #[arg(long)]
        index: Option<String>,
    },
    /// Delete everything stored in the signature index
    ClearIndex {
        #[arg(long)]
        index: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct FindArgs {
    #[arg(long, value_enum, default_value_t = SearchArg::Exact)]
    pub search: SearchArg,

    /// Image codec: dhash, block-mean, phash or color-dct
    #[arg(long, value_parser = parse_algorithm)]
    pub algorithm: Option<ImageAlgorithm>,

    /// Degree of similarity between 0 and 1
    #[arg(long)]
    pub degree: Option<f64>,

    /// SQLite index file; an in-memory index is used when absent
    #[arg(long)]
    pub index: Option<String>,

    /// List every file that was skipped and why
    #[arg(long)]
    pub show_errors: bool,

    /// Directories to search; defaults to the configured root paths
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchArg {
    Exact,
    Image,
    Audio,
}

impl From<SearchArg> for SearchType {
    fn from(arg: SearchArg) -> Self {
        match arg {
            SearchArg::Exact => SearchType::ExactHash,
            SearchArg::Image => SearchType::Image,
            SearchArg::Audio => SearchType::Audio,
        }
    }
}

fn parse_algorithm(s: &str) -> Result<ImageAlgorithm, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_arguments() {
        let cli = Cli::try_parse_from([
            "near-duper",
            "find",
            "--search",
            "image",
            "--algorithm",
            "dhash",
            "--degree",
            "0.8",
            "/photos",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Find(args)) => {
                assert_eq!(SearchType::from(args.search), SearchType::Image);
                assert_eq!(args.algorithm, Some(ImageAlgorithm::DifferenceHash));
                assert_eq!(args.degree, Some(0.8));
                assert_eq!(args.paths, vec!["/photos".to_string()]);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(Cli::try_parse_from(["near-duper", "find", "--algorithm", "ahash"]).is_err());
    }
}
