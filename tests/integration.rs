use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

fn test_dir(name: &str) -> PathBuf {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(name);
    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");
    test_dir
}

fn exec_bin(args: &[&str]) -> Output {
    let bin = PathBuf::from(env!("CARGO_BIN_EXE_mutsel"));
    Command::new(bin)
        .args(args)
        .output()
        .expect("failed to execute command")
}

fn run_bin(args: &[&str]) {
    let output = exec_bin(args);

    let stdout_str =
        std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
    let stderr_str =
        std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");

    assert!(
        output.status.success(),
        "failed to run binary with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n"
    );
}

fn path_str(path: &Path) -> &str {
    path.to_str().expect("failed to convert path to string")
}

fn read_json(path: &Path) -> serde_json::Value {
    let contents = fs::read_to_string(path).expect("failed to read output file");
    serde_json::from_str(&contents).expect("failed to parse output file")
}

#[test]
fn basic_workflow() {
    let test_dir = test_dir("basic_workflow");

    let gaussian = test_dir.join("gaussian.json");
    let none = test_dir.join("none.msgpack");
    let none_exact = test_dir.join("none_exact.json");

    #[rustfmt::skip]
    run_bin(&[
        "simulate",
        "--mutation-distribution-type", "Gaussian",
        "--population-size", "Infinite",
        "--number-of-years", "40",
        "--number-of-discrete-population-fitness-values", "251",
        "--output", path_str(&gaussian),
    ]);
    #[rustfmt::skip]
    run_bin(&[
        "simulate",
        "--mutation-distribution-type", "None",
        "--population-size", "Infinite",
        "--number-of-years", "40",
        "--number-of-discrete-population-fitness-values", "251",
        "--output", path_str(&none),
    ]);
    #[rustfmt::skip]
    run_bin(&[
        "simulate",
        "--mutation-distribution-type", "NoneExact",
        "--population-size", "Finite",
        "--number-of-years", "40",
        "--number-of-discrete-population-fitness-values", "251",
        "--output", path_str(&none_exact),
    ]);

    let record = read_json(&gaussian);
    assert_eq!(record["mutation_type"], "Gaussian");
    assert_eq!(record["number_of_years"], 40);
    assert_eq!(record["growth_rates"].as_array().unwrap().len(), 251);
    assert_eq!(record["mutation_probs"].as_array().unwrap().len(), 501);
    let trajectory = record["trajectory"].as_array().unwrap();
    assert_eq!(trajectory.len(), 40);
    assert!(trajectory.iter().all(|dist| dist.as_array().unwrap().len() == 251));
    assert_eq!(record["mean_fitness"].as_array().unwrap().len(), 40);
    assert!(fs::metadata(&none).unwrap().len() > 0);

    let comparison = test_dir.join("comparison.json");
    let pattern = test_dir.join("*.json");
    run_bin(&[
        "compare",
        "--output",
        path_str(&comparison),
        path_str(&pattern),
        path_str(&none),
    ]);

    let report = read_json(&comparison);
    assert_eq!(report["runs"].as_array().unwrap().len(), 3);
    let comparisons = report["comparisons"].as_array().unwrap();
    assert_eq!(comparisons.len(), 2);

    // gaussian.json sorts first, then none_exact.json, then none.msgpack.
    let exact_vs_gaussian = &comparisons[0]["max_abs_diff"];
    assert!(exact_vs_gaussian["variance_fitness"].as_f64().unwrap() > 0.0);
    let none_vs_gaussian = &comparisons[1]["max_abs_diff"];
    let none_vs_exact = (none_vs_gaussian["mean_fitness"].as_f64().unwrap()
        - exact_vs_gaussian["mean_fitness"].as_f64().unwrap())
    .abs();
    assert!(none_vs_exact < 1e-9);

    // The earlier report now matches the pattern too.
    run_bin(&[
        "compare",
        "--output",
        path_str(&comparison),
        path_str(&pattern),
        path_str(&none),
    ]);
    let report = read_json(&comparison);
    assert_eq!(report["runs"].as_array().unwrap().len(), 3);

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn kernel_workflow() {
    let test_dir = test_dir("kernel_workflow");

    let kernel = test_dir.join("kernel.json");
    #[rustfmt::skip]
    run_bin(&[
        "kernel",
        "--mutation-distribution-type", "Gamma",
        "--percentage-of-mutations-that-are-beneficial", "0.001",
        "--number-of-discrete-population-fitness-values", "501",
        "--output", path_str(&kernel),
    ]);

    let record = read_json(&kernel);
    assert_eq!(record["mutation_probs"].as_array().unwrap().len(), 1001);
    let total = record["kernel_summary"]["total"].as_f64().unwrap();
    assert!((total - 0.8219477435272998).abs() < 1e-9);
    let beneficial = record["kernel_summary"]["beneficial"].as_f64().unwrap();
    assert!(beneficial < 0.001);

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn equilibrium_workflow() {
    let test_dir = test_dir("equilibrium_workflow");

    let lossy = test_dir.join("lossy.json");
    let lossless = test_dir.join("lossless.msgpack");
    #[rustfmt::skip]
    run_bin(&[
        "equilibrium",
        "--mutation-distribution-type", "Gaussian",
        "--number-of-discrete-population-fitness-values", "51",
        "--output", path_str(&lossy),
    ]);

    let config_path = test_dir.join("config.toml");
    fs::write(&config_path, "[mutation]\nlossy = false\n").expect("failed to write config file");
    #[rustfmt::skip]
    run_bin(&[
        "equilibrium",
        "--config", path_str(&config_path),
        "--mutation-distribution-type", "Gaussian",
        "--number-of-discrete-population-fitness-values", "51",
        "--output", path_str(&lossless),
    ]);
    assert!(fs::metadata(&lossless).unwrap().len() > 0);

    let record = read_json(&lossy);
    assert_eq!(record["lossy"], true);
    assert_eq!(record["converged"], true);
    let distribution = record["distribution"].as_array().unwrap();
    assert_eq!(distribution.len(), 51);
    let mass: f64 = distribution.iter().map(|val| val.as_f64().unwrap()).sum();
    assert!((mass - 1.0).abs() < 1e-9);
    let mean = record["mean_fitness"].as_f64().unwrap();
    assert!((-0.1..=0.15).contains(&mean));

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn config_file_workflow() {
    let test_dir = test_dir("config_file_workflow");

    let config_path = test_dir.join("config.toml");
    let config_contents = String::new()
        + "[run]\n"
        + "mutation_distribution_type = \"GammaRenormalized\"\n"
        + "percentage_of_mutations_that_are_beneficial = 0.01\n"
        + "population_size = \"Finite\"\n"
        + "number_of_years = 25\n"
        + "number_of_discrete_population_fitness_values = 101\n"
        + "\n"
        + "[selection]\n"
        + "scheme = \"birth-death\"\n"
        + "steps_per_year = 4\n"
        + "\n"
        + "[finite]\n"
        + "method = \"stochastic\"\n"
        + "capacity = \"logistic\"\n"
        + "max_size = 100000\n"
        + "init_size = 50000\n"
        + "seed = 11\n";

    fs::write(&config_path, config_contents).expect("failed to write config file");

    let first = test_dir.join("first.json");
    let second = test_dir.join("second.json");
    run_bin(&["simulate", "--config", path_str(&config_path), "--output", path_str(&first)]);
    #[rustfmt::skip]
    run_bin(&[
        "simulate",
        "--config", path_str(&config_path),
        "--number-of-years", "10",
        "--output", path_str(&second),
    ]);

    let first = read_json(&first);
    let second = read_json(&second);
    assert_eq!(first["trajectory"].as_array().unwrap().len(), 25);
    assert_eq!(second["trajectory"].as_array().unwrap().len(), 10);
    assert_eq!(first["trajectory"][9], second["trajectory"][9]);

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn invalid_input_fails_fast() {
    let test_dir = test_dir("invalid_input_fails_fast");

    let output_path = test_dir.join("output.json");
    let output_str = path_str(&output_path);
    let csv_path = test_dir.join("output.csv");
    let glob_path = test_dir.join("*.json");

    let invalid_args: [&[&str]; 5] = [
        &["simulate", "--number-of-years", "0", "--output", output_str],
        &["simulate", "--mutation-distribution-type", "Uniform", "--output", output_str],
        &["simulate", "--mutation-distribution-type", "Gamma", "--output", output_str],
        &["simulate", "--output", path_str(&csv_path)],
        &["compare", "--output", output_str, path_str(&glob_path)],
    ];
    for args in invalid_args {
        let output = exec_bin(args);
        assert!(!output.status.success(), "binary accepted {args:?}");
        assert!(!output_path.exists());
        assert!(!csv_path.exists());
    }

    fs::remove_dir_all(&test_dir).ok();
}
