//! Concert prediction CLI
//!
//! Builds the concert feature table and trains the regressor on it.

use clap::{Parser, Subcommand};
use concert::features::MissingDataPolicy;
use concert::{Config, Result};

#[derive(Parser)]
#[command(name = "concert")]
#[command(about = "Concert outcome prediction from artist activity", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the feature table from the source CSV files
    Preprocess {
        /// Override the data directory
        #[arg(long)]
        data_dir: Option<String>,
        /// Reuse a saved vocabulary instead of fitting a new one
        #[arg(long)]
        vocabulary: Option<String>,
        /// What to do with rows lacking latest-value records
        #[arg(long)]
        missing: Option<PolicyArg>,
        /// Do not write the feature table
        #[arg(long)]
        no_save: bool,
    },
    /// Train the regressor on a feature table
    Train {
        /// Feature table to train on; built from the sources when absent
        #[arg(long)]
        input: Option<String>,
        /// Override number of epochs
        #[arg(long)]
        epochs: Option<usize>,
    },
    /// Score the saved model on a feature table
    Evaluate {
        /// Feature table to score; built from the sources when absent
        #[arg(long)]
        input: Option<String>,
    },
    /// Initialize a new project with default config
    Init,
}

#[derive(Clone, Debug)]
struct PolicyArg(MissingDataPolicy);

impl std::str::FromStr for PolicyArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(PolicyArg(MissingDataPolicy::Abort)),
            "drop" | "drop-row" => Ok(PolicyArg(MissingDataPolicy::DropRow)),
            "nan" => Ok(PolicyArg(MissingDataPolicy::Nan)),
            _ => Err(format!("Unknown policy: {}. Use abort, drop or nan.", s)),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load or create config
    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    let result = match cli.command {
        Commands::Preprocess {
            data_dir,
            vocabulary,
            missing,
            no_save,
        } => commands::preprocess(&config, data_dir, vocabulary, missing, no_save).map(|_| ()),
        Commands::Train { input, epochs } => commands::train(&config, input, epochs),
        Commands::Evaluate { input } => commands::evaluate(&config, input),
        Commands::Init => commands::init(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

mod commands {
    use super::*;
    use concert::data::dataset::TrainingMatrix;
    use concert::data::table::{ColumnHints, Table};
    use concert::data::SourceTables;
    use concert::features::{FeatureJoinPipeline, FeatureSchema};
    use concert::training::{evaluate_matrix, load_trained, RegressorTrainer};
    use std::path::Path;

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        std::fs::create_dir_all(&config.data.data_dir)?;
        std::fs::create_dir_all("model")?;
        println!("Created {}/ and model/ directories", config.data.data_dir);

        println!("\nNext steps:");
        println!("  1. Put the five source CSV files into {}/", config.data.data_dir);
        println!("  2. Run 'concert preprocess' to build the feature table");
        println!("  3. Run 'concert train' to train the model");
        println!("  4. Run 'concert evaluate' to score the saved model");

        Ok(())
    }

    pub fn preprocess(
        config: &Config,
        data_dir: Option<String>,
        vocabulary: Option<String>,
        missing: Option<PolicyArg>,
        no_save: bool,
    ) -> Result<Table> {
        let mut config = config.clone();
        if let Some(dir) = data_dir {
            config.data.data_dir = dir;
        }
        if let Some(PolicyArg(policy)) = missing {
            config.pipeline.missing_data = policy;
        }

        let inputs = SourceTables::load(&config)?;
        let mut pipeline = FeatureJoinPipeline::from_config(&config);
        if let Some(path) = &vocabulary {
            pipeline = pipeline.with_vocabulary(FeatureSchema::load(Path::new(path))?);
        }
        let output = pipeline.run(&inputs)?;

        println!("Feature table");
        println!("───────────────────────────────");
        println!("  Concerts in:       {}", output.report.concerts_in);
        println!("  Dropped (no artist): {}", output.report.dropped_concerts.len());
        println!("  Missing-data slots:  {}", output.report.failures.len());
        println!("  Rows out:          {}", output.report.rows_out);
        println!("  Columns:           {}", output.table.columns().len());

        if config.pipeline.save && !no_save {
            let vocab_path = vocabulary
                .is_none()
                .then(|| Path::new(&config.data.vocabulary_path));
            output.save(Path::new(&config.data.output_path), vocab_path)?;
            println!("Saved to {}", config.data.output_path);
        }

        Ok(output.table)
    }

    pub fn train(config: &Config, input: Option<String>, epochs: Option<usize>) -> Result<()> {
        use burn::backend::{Autodiff, NdArray};

        type MyBackend = NdArray<f32>;
        type MyAutodiffBackend = Autodiff<MyBackend>;

        let mut training_config = config.training.clone();
        if let Some(e) = epochs {
            training_config.epochs = e;
        }

        let table = feature_table(config, input)?;
        let matrix = TrainingMatrix::from_table(&table, &config.columns.label)?;
        println!(
            "Training on {} samples with {} features",
            matrix.features.len(),
            matrix.dim()
        );

        let device = Default::default();
        let trainer = RegressorTrainer::<MyAutodiffBackend>::new(training_config, device);
        let outcome = trainer.train(&matrix)?;

        println!("\nTraining complete");
        println!("───────────────────────────────");
        println!("  Epochs:    {}", outcome.history.epochs());
        if let Some(loss) = outcome.history.final_train_loss() {
            println!("  Train MSE: {:.4}", loss);
        }
        println!("  Test MSE:  {:.4}", outcome.test.mse());
        println!("  Test MAE:  {:.4}", outcome.test.mae());

        if let Some(parent) = Path::new(&config.data.model_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        outcome.save(&config.data.model_path)?;
        println!("Model saved to {}", config.data.model_path);

        Ok(())
    }

    pub fn evaluate(config: &Config, input: Option<String>) -> Result<()> {
        use burn::backend::NdArray;

        type MyBackend = NdArray<f32>;

        let device = Default::default();
        let (model, artifacts) =
            load_trained::<MyBackend>(&device, &config.data.model_path)?;

        let table = feature_table(config, input)?;
        let matrix =
            TrainingMatrix::with_features(&table, &config.columns.label, &artifacts.feature_names)?;
        let (metrics, _) = evaluate_matrix(&model, &artifacts, &matrix, &device)?;

        println!("Evaluation on {} samples", metrics.count);
        println!("───────────────────────────────");
        println!("  MSE: {:.4}", metrics.mse());
        println!("  MAE: {:.4}", metrics.mae());

        Ok(())
    }

    /// Read a saved feature table, or build one when no path is given
    fn feature_table(config: &Config, input: Option<String>) -> Result<Table> {
        match input {
            Some(path) => Table::read_csv(
                Path::new(&path),
                &ColumnHints {
                    text: vec![config.columns.artist_id.as_str()],
                    dates: vec![config.columns.closing_date.as_str()],
                },
            ),
            None => preprocess(config, None, None, None, false),
        }
    }
}
