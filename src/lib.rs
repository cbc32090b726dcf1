pub mod schema;
pub mod optimizer;
pub mod validate;
pub mod template;

// Re-export common types
pub use optimizer::OptimizerKind;
pub use schema::{
    from_yaml, load_config, save_config, to_yaml, DatasetConfig, Dtype, InitLoraWeights,
    LoraConfig, ModelConfig, OptimizerConfig, TargetModules, TrainConfig, TrainingConfig,
    WandbConfig,
};
pub use template::{generate_config, generate_yaml, Template};
pub use validate::{validate_config, ValidationError, ValidationReport};

pub mod logging {
    use log::LevelFilter;
    use env_logger::Builder;
    use std::io::Write;

    pub fn init_logger() {
        Builder::new()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{} [{}] - {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.args()
                )
            })
            .filter(None, LevelFilter::Info)
            .parse_default_env()
            .init();
    }
}
