//! Command-line argument construction for llama-server.

use llamad_core::ServiceConfig;

/// Build the argument vector for launching llama-server from a configuration.
///
/// Host and port are always present. A specific model file (`-m`) takes
/// precedence over a models directory (`--models-dir`). Unset options are
/// omitted entirely so the server applies its own defaults; `threads` and
/// `gpu_layers` treat negative values as unset.
#[must_use]
pub fn build_server_args(config: &ServiceConfig) -> Vec<String> {
    let mut args = vec![
        "--host".to_string(),
        config.host.clone(),
        "--port".to_string(),
        config.port.to_string(),
    ];

    if let Some(model) = &config.model_path {
        args.push("-m".to_string());
        args.push(model.display().to_string());
    } else if let Some(dir) = &config.models_dir {
        args.push("--models-dir".to_string());
        args.push(dir.display().to_string());
    }

    if let Some(ctx) = config.ctx_size {
        args.push("-c".to_string());
        args.push(ctx.to_string());
    }
    if let Some(batch) = config.batch_size {
        args.push("-b".to_string());
        args.push(batch.to_string());
    }
    if let Some(threads) = config.threads {
        if threads >= 0 {
            args.push("-t".to_string());
            args.push(threads.to_string());
        }
    }
    if let Some(layers) = config.gpu_layers {
        if layers >= 0 {
            args.push("-ngl".to_string());
            args.push(layers.to_string());
        }
    }
    match config.flash_attn {
        Some(true) => args.push("-fa".to_string()),
        Some(false) => args.push("--no-flash-attn".to_string()),
        None => {}
    }
    if let Some(temp) = config.temperature {
        args.push("--temp".to_string());
        args.push(temp.to_string());
    }
    if let Some(top_k) = config.top_k {
        args.push("--top-k".to_string());
        args.push(top_k.to_string());
    }
    if let Some(top_p) = config.top_p {
        args.push("--top-p".to_string());
        args.push(top_p.to_string());
    }
    if let Some(penalty) = config.repeat_penalty {
        args.push("--repeat-penalty".to_string());
        args.push(penalty.to_string());
    }
    if let Some(n_predict) = config.n_predict {
        args.push("--n-predict".to_string());
        args.push(n_predict.to_string());
    }

    args.extend(config.extra_args.iter().cloned());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServiceConfig {
        ServiceConfig::new("127.0.0.1", 8134, "/opt/llama/llama-server")
    }

    fn position(args: &[String], flag: &str) -> Option<usize> {
        args.iter().position(|a| a == flag)
    }

    fn value_of<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        position(args, flag).map(|i| args[i + 1].as_str())
    }

    #[test]
    fn minimal_config_yields_host_and_port_only() {
        let args = build_server_args(&config());
        assert_eq!(args, ["--host", "127.0.0.1", "--port", "8134"]);
    }

    #[test]
    fn model_path_wins_over_models_dir() {
        let cfg = config()
            .with_models_dir("/models")
            .with_model_path("/models/llama-3.gguf");
        let args = build_server_args(&cfg);
        assert_eq!(value_of(&args, "-m"), Some("/models/llama-3.gguf"));
        assert!(position(&args, "--models-dir").is_none());
    }

    #[test]
    fn models_dir_used_without_model_path() {
        let cfg = config().with_models_dir("/models");
        let args = build_server_args(&cfg);
        assert_eq!(value_of(&args, "--models-dir"), Some("/models"));
        assert!(position(&args, "-m").is_none());
    }

    #[test]
    fn context_and_batch_sizes_are_forwarded() {
        let cfg = config().with_ctx_size(8192).with_batch_size(512);
        let args = build_server_args(&cfg);
        assert_eq!(value_of(&args, "-c"), Some("8192"));
        assert_eq!(value_of(&args, "-b"), Some("512"));
    }

    #[test]
    fn negative_threads_and_gpu_layers_are_omitted() {
        let cfg = config().with_threads(-1).with_gpu_layers(-1);
        let args = build_server_args(&cfg);
        assert!(position(&args, "-t").is_none());
        assert!(position(&args, "-ngl").is_none());

        let cfg = config().with_threads(8).with_gpu_layers(0);
        let args = build_server_args(&cfg);
        assert_eq!(value_of(&args, "-t"), Some("8"));
        assert_eq!(value_of(&args, "-ngl"), Some("0"));
    }

    #[test]
    fn flash_attention_has_three_states() {
        assert!(position(&build_server_args(&config()), "-fa").is_none());

        let args = build_server_args(&config().with_flash_attn(true));
        assert!(position(&args, "-fa").is_some());

        let args = build_server_args(&config().with_flash_attn(false));
        assert!(position(&args, "--no-flash-attn").is_some());
        assert!(position(&args, "-fa").is_none());
    }

    #[test]
    fn sampling_options_are_forwarded() {
        let mut cfg = config();
        cfg.temperature = Some(0.7);
        cfg.top_k = Some(40);
        cfg.top_p = Some(0.9);
        cfg.repeat_penalty = Some(1.1);
        cfg.n_predict = Some(-1);
        let args = build_server_args(&cfg);
        assert_eq!(value_of(&args, "--temp"), Some("0.7"));
        assert_eq!(value_of(&args, "--top-k"), Some("40"));
        assert_eq!(value_of(&args, "--top-p"), Some("0.9"));
        assert_eq!(value_of(&args, "--repeat-penalty"), Some("1.1"));
        assert_eq!(value_of(&args, "--n-predict"), Some("-1"));
    }

    #[test]
    fn extra_args_are_appended_last() {
        let cfg = config().with_extra_args(vec!["--mlock".into(), "--verbose".into()]);
        let args = build_server_args(&cfg);
        assert_eq!(&args[args.len() - 2..], ["--mlock", "--verbose"]);
    }
}
