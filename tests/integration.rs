use std::{env, fs, path::PathBuf, process::Command};

#[test]
fn basic_workflow() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("basic_workflow");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    let config_path = test_dir.join("config.toml");
    let config_contents = String::new()
        + "seed = 42\n"
        + "\n"
        + "[model]\n"
        + "beta = 0.09\n"
        + "alpha = 0.156\n"
        + "gamma = 0.133\n"
        + "frac_infected = 0.05\n"
        + "\n"
        + "[network]\n"
        + "kind = \"powerlaw_cluster\"\n"
        + "n_nodes = 60\n"
        + "n_edges = 2\n"
        + "triangle_prob = 0.3\n"
        + "\n"
        + "[mitigation]\n"
        + "total_iterations = 28\n"
        + "measure_every = 7\n"
        + "capacity = 3\n"
        + "rollover = true\n"
        + "use_all = true\n"
        + "features = [\"degree\", \"nb_infected\", \"traveler\", \"num_infected\"]\n"
        + "\n"
        + "[dynamics]\n"
        + "enabled = true\n"
        + "add_prob = 0.01\n"
        + "remove_prob = 0.01\n"
        + "\n"
        + "[evolution]\n"
        + "pop_size = 6\n"
        + "n_generations = 2\n"
        + "prob_cx = 0.8\n"
        + "prob_mut = 0.1\n"
        + "init_min_depth = 1\n"
        + "init_max_depth = 3\n"
        + "mut_max_depth = 2\n"
        + "max_height = 5\n"
        + "max_size = 32\n"
        + "objectives = [\"peak_infected\", \"cumulative_infected\"]\n";

    fs::write(&config_path, config_contents).expect("failed to write config file");

    fn run_bin(args: &[&str]) -> bool {
        let bin = PathBuf::from(env!("CARGO_BIN_EXE_mitigare"));

        let output = Command::new(bin)
            .args(args)
            .output()
            .expect("failed to execute command");

        if !output.status.success() {
            let stdout_str =
                std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
            let stderr_str =
                std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");
            eprintln!("binary failed with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n");
        }
        output.status.success()
    }

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    assert!(run_bin(&["--sim-dir", test_dir_str, "evolve"]));
    assert!(test_dir.join("network.msgpack").is_file());
    assert!(test_dir.join("evolve-0000/population.msgpack").is_file());
    assert!(test_dir.join("evolve-0000/logbook.msgpack").is_file());

    for strategy in ["none", "random", "traveler", "degree:4", "best"] {
        assert!(run_bin(&[
            "--sim-dir",
            test_dir_str,
            "evaluate",
            "--strategy",
            strategy,
            "--n-runs",
            "3",
        ]));
    }
    assert!(run_bin(&[
        "--sim-dir",
        test_dir_str,
        "evaluate",
        "--strategy",
        "random",
        "--n-runs",
        "2",
        "--new-topology",
    ]));
    assert!(test_dir.join("eval-degree-4/trajectories.msgpack").is_file());

    assert!(!run_bin(&[
        "--sim-dir",
        test_dir_str,
        "evaluate",
        "--strategy",
        "cheapest",
    ]));

    assert!(run_bin(&["--sim-dir", test_dir_str, "analyze"]));
    assert!(test_dir.join("eval-best/summary.msgpack").is_file());

    assert!(run_bin(&["--sim-dir", test_dir_str, "clean"]));
    assert!(!test_dir.join("evolve-0000").exists());
    assert!(!test_dir.join("network.msgpack").exists());

    fs::remove_dir_all(&test_dir).ok();
}
