//! Build task generation.

use multibuild_core::{BuildConfig, BuildTask};

/// Fan a build configuration out into one task per enabled variant,
/// each carrying a deep, variant-specialized copy of the configuration
/// and a fixed priority.
///
/// Pure. An empty variant list yields an empty task list ("nothing to
/// do"), not an error.
pub fn generate_tasks(config: &BuildConfig) -> Vec<BuildTask> {
    config
        .variants
        .iter()
        .map(|&variant| BuildTask::new(variant, config.specialize(variant)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use multibuild_core::VariantKind;
    use std::path::PathBuf;

    #[test]
    fn test_one_task_per_enabled_variant() {
        let config = BuildConfig::new("mylib", "src/index.ts", "dist")
            .with_variant(VariantKind::Esm)
            .with_variant(VariantKind::Umd);

        let tasks = generate_tasks(&config);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].variant, VariantKind::Esm);
        assert_eq!(tasks[1].variant, VariantKind::Umd);
        assert_ne!(tasks[0].id, tasks[1].id);
    }

    #[test]
    fn test_tasks_carry_specialized_configs() {
        let config = BuildConfig::new("mylib", "src/index.ts", "dist")
            .with_variant(VariantKind::Esm)
            .with_variant(VariantKind::Cjs);

        let tasks = generate_tasks(&config);
        assert_eq!(tasks[0].config.format, Some(VariantKind::Esm));
        assert_eq!(tasks[0].config.out_dir, PathBuf::from("dist/esm"));
        assert_eq!(tasks[1].config.out_dir, PathBuf::from("dist/cjs"));
        // The root config is never handed out.
        assert!(tasks.iter().all(|t| t.config.format.is_some()));
    }

    #[test]
    fn test_priorities_follow_variant_ranking() {
        let config = BuildConfig::new("mylib", "src/index.ts", "dist")
            .with_variant(VariantKind::Cjs)
            .with_variant(VariantKind::Umd);

        let tasks = generate_tasks(&config);
        let umd = tasks.iter().find(|t| t.variant == VariantKind::Umd).unwrap();
        let cjs = tasks.iter().find(|t| t.variant == VariantKind::Cjs).unwrap();
        assert!(umd.priority > cjs.priority);
    }

    #[test]
    fn test_zero_variants_is_nothing_to_do() {
        let config = BuildConfig::new("mylib", "src/index.ts", "dist");
        assert!(generate_tasks(&config).is_empty());
    }
}
