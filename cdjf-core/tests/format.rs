use cdjf_core::benchmark::{BenchmarkConfig, MIB, Thresholds};
use cdjf_core::device::{ClusterSize, Device};
use cdjf_core::error::{ConfigError, DeviceError};
use cdjf_core::format::{FormatRequest, FormatStatus, Formatter};
use cdjf_core::frontend::Frontend;
use cdjf_core::platform::DeviceDriver;
use cdjf_core::translate::ProgressTable;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

const DISKUTIL_SESSION: &[&str] = &[
    "Started erase on disk2",
    "Unmounting disk",
    "Creating the partition map",
    "Waiting for partitions to activate",
    "Formatting disk2s1 as MS-DOS (FAT32) with name REKORDBOX",
    "512 bytes per physical sector",
    "Mounting disk",
    "Finished erase on disk2",
];

#[derive(Default)]
struct MockDriver {
    not_removable: HashSet<String>,
    system: HashSet<String>,
    failing: HashSet<String>,
    labels: HashSet<String>,
    sizes: HashMap<String, f64>,
    mount: Option<PathBuf>,
    script: Vec<&'static str>,
    calls: Mutex<Vec<String>>,
}

impl MockDriver {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_to(&self, method: &str) -> Vec<String> {
        let prefix = format!("{} ", method);
        let mut calls: Vec<String> = self
            .calls()
            .into_iter()
            .filter(|c| c.starts_with(&prefix))
            .collect();
        calls.sort();
        calls
    }
}

impl DeviceDriver for MockDriver {
    fn validate_identifier(&self, device: &str) -> Result<(), DeviceError> {
        self.record(format!("validate {}", device));
        match device.strip_prefix("disk") {
            Some(n) if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) => Ok(()),
            _ => Err(DeviceError::InvalidIdentifier {
                device: device.to_string(),
                expected: "diskN",
            }),
        }
    }

    fn is_removable(&self, device: &str) -> bool {
        self.record(format!("removable {}", device));
        !self.not_removable.contains(device)
    }

    fn is_system_drive(&self, device: &str) -> bool {
        self.record(format!("system {}", device));
        self.system.contains(device)
    }

    fn mount_point(&self, device: &str) -> Result<PathBuf, DeviceError> {
        self.record(format!("mount {}", device));
        self.mount
            .clone()
            .ok_or_else(|| DeviceError::NotMounted(device.to_string()))
    }

    fn size_gb(&self, device: &str) -> f64 {
        self.record(format!("size {}", device));
        self.sizes.get(device).copied().unwrap_or(16.0)
    }

    fn existing_labels(&self, exclude: &str) -> HashSet<String> {
        self.record(format!("labels {}", exclude));
        self.labels.clone()
    }

    fn erase(
        &self,
        device: &str,
        label: &str,
        _cluster: Option<ClusterSize>,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<(), DeviceError> {
        self.record(format!("erase {} {}", device, label));
        for line in self.script.iter().copied() {
            on_line(line);
        }
        if self.failing.contains(device) {
            return Err(DeviceError::CommandFailed {
                program: "diskutil".to_string(),
                status: "exit status: 1".to_string(),
                output: "Error: -69877: Couldn't open device".to_string(),
            });
        }
        Ok(())
    }

    fn eject(&self, device: &str) -> Result<(), DeviceError> {
        self.record(format!("eject {}", device));
        Ok(())
    }

    fn list_devices(&self) -> Result<Vec<Device>, DeviceError> {
        Ok(Vec::new())
    }

    fn progress_table(&self) -> ProgressTable {
        ProgressTable::diskutil()
    }

    fn describe(&self, _: &str) -> Result<Vec<(String, String)>, DeviceError> {
        Ok(Vec::new())
    }

    fn example_identifier(&self) -> &'static str {
        "disk2"
    }
}

/// Answers prompts from a queue and records everything it is shown.
#[derive(Default)]
struct ScriptedFrontend {
    answers: RefCell<VecDeque<bool>>,
    prompts: RefCell<Vec<String>>,
    messages: RefCell<Vec<String>>,
    progress: RefCell<Vec<(String, String, bool)>>,
    logs: RefCell<Vec<(String, String)>>,
}

impl ScriptedFrontend {
    fn answering(answers: &[bool]) -> Self {
        Self {
            answers: RefCell::new(answers.iter().copied().collect()),
            ..Self::default()
        }
    }

    fn said(&self, needle: &str) -> bool {
        self.messages.borrow().iter().any(|m| m.contains(needle))
    }
}

impl Frontend for ScriptedFrontend {
    fn confirm(&self, prompt: &str, _default: bool) -> anyhow::Result<bool> {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.answers
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("unexpected prompt: {}", prompt))
    }

    fn info(&self, message: &str) {
        self.messages.borrow_mut().push(message.to_string());
    }

    fn warn(&self, message: &str) {
        self.messages.borrow_mut().push(message.to_string());
    }

    fn progress(&self, device: &str, line: &str) {
        self.progress
            .borrow_mut()
            .push((device.to_string(), line.to_string(), false));
    }

    fn progress_done(&self, device: &str, line: &str) {
        self.progress
            .borrow_mut()
            .push((device.to_string(), line.to_string(), true));
    }

    fn log(&self, device: &str, line: &str) {
        self.logs
            .borrow_mut()
            .push((device.to_string(), line.to_string()));
    }
}

fn request(devices: &[&str], assume_yes: bool) -> FormatRequest {
    let mut request = FormatRequest::new(devices.iter().map(|d| d.to_string()).collect());
    request.assume_yes = assume_yes;
    request
}

fn percent(line: &str) -> f64 {
    line.split_whitespace()
        .find_map(|token| token.strip_suffix('%'))
        .and_then(|value| value.parse().ok())
        .unwrap_or_else(|| panic!("no percentage in {line:?}"))
}

#[test]
fn concurrent_devices_get_distinct_labels() {
    let driver = MockDriver::default();
    let running = AtomicBool::new(true);
    let frontend = ScriptedFrontend::default();

    let summary = Formatter::new(&driver, &running)
        .run(&request(&["disk2", "disk3", "disk4"], true), &frontend)
        .unwrap();

    assert!(summary.all_succeeded());
    assert_eq!(summary.outcomes.len(), 3);
    let mut labels: Vec<(String, String)> = summary
        .outcomes
        .iter()
        .map(|o| (o.device.clone(), o.label.clone()))
        .collect();
    labels.sort();
    assert_eq!(
        labels,
        vec![
            ("disk2".to_string(), "REKORDBOX".to_string()),
            ("disk3".to_string(), "REKORDBOX2".to_string()),
            ("disk4".to_string(), "REKORDBOX3".to_string()),
        ]
    );
    assert_eq!(
        driver.calls_to("erase"),
        vec!["erase disk2 REKORDBOX", "erase disk3 REKORDBOX2", "erase disk4 REKORDBOX3"]
    );
    assert!(frontend.said("Formatting 3 drives concurrently..."));
    assert!(frontend.said("=== Format Results ==="));
    assert!(frontend.said("[disk3] SUCCESS"));
}

#[test]
fn taken_label_is_replaced_and_announced() {
    let driver = MockDriver {
        labels: ["REKORDBOX".to_string()].into(),
        ..MockDriver::default()
    };
    let running = AtomicBool::new(true);
    let frontend = ScriptedFrontend::default();

    let summary = Formatter::new(&driver, &running)
        .run(&request(&["disk2"], true), &frontend)
        .unwrap();

    assert_eq!(summary.outcomes[0].label, "REKORDBOX2");
    assert!(frontend.said("Label 'REKORDBOX' already exists, using 'REKORDBOX2' instead"));
}

#[test]
fn rejected_device_does_not_block_the_others() {
    let driver = MockDriver {
        not_removable: ["disk3".to_string()].into(),
        ..MockDriver::default()
    };
    let running = AtomicBool::new(true);
    let frontend = ScriptedFrontend::default();

    let summary = Formatter::new(&driver, &running)
        .run(&request(&["disk2", "disk3", "disk4"], true), &frontend)
        .unwrap();

    assert_eq!(summary.outcomes.len(), 3);
    assert!(!summary.all_succeeded());
    let rejected = summary
        .outcomes
        .iter()
        .find(|o| o.device == "disk3")
        .unwrap();
    assert_eq!(rejected.status, FormatStatus::Failed);
    assert!(rejected.detail.as_deref().unwrap().contains("not detected as a removable"));

    assert_eq!(
        driver.calls_to("erase"),
        vec!["erase disk2 REKORDBOX", "erase disk4 REKORDBOX3"]
    );
    assert!(frontend.said("Error with device disk3"));
    assert!(frontend.said("[disk3] FAILED: disk3 is not detected as a removable"));
    let results = frontend.messages.borrow();
    let table_start = results
        .iter()
        .position(|m| m == "=== Format Results ===")
        .unwrap();
    let rows = results[table_start + 1..]
        .iter()
        .filter(|m| m.contains("] SUCCESS") || m.contains("] FAILED"))
        .count();
    assert_eq!(rows, 3);
}

#[test]
fn system_drive_is_refused_before_any_erase() {
    let driver = MockDriver {
        system: ["disk0".to_string()].into(),
        ..MockDriver::default()
    };
    let running = AtomicBool::new(true);
    let frontend = ScriptedFrontend::default();

    let summary = Formatter::new(&driver, &running)
        .run(&request(&["disk0"], true), &frontend)
        .unwrap();

    assert_eq!(summary.outcomes.len(), 1);
    assert_eq!(summary.outcomes[0].status, FormatStatus::Failed);
    assert!(driver.calls_to("erase").is_empty());
    assert!(frontend.prompts.borrow().is_empty());
}

#[test]
fn malformed_identifier_fails_only_that_device() {
    let driver = MockDriver::default();
    let running = AtomicBool::new(true);
    let frontend = ScriptedFrontend::default();

    let summary = Formatter::new(&driver, &running)
        .run(&request(&["/dev/sdb", "disk2"], true), &frontend)
        .unwrap();

    let bad = summary
        .outcomes
        .iter()
        .find(|o| o.device == "/dev/sdb")
        .unwrap();
    assert!(!bad.is_success());
    assert!(bad.detail.as_deref().unwrap().contains("expected diskN"));
    assert_eq!(driver.calls_to("erase"), vec!["erase disk2 REKORDBOX2"]);
}

#[test]
fn declining_confirmation_erases_nothing() {
    let driver = MockDriver::default();
    let running = AtomicBool::new(true);
    let frontend = ScriptedFrontend::answering(&[false]);

    let summary = Formatter::new(&driver, &running)
        .run(&request(&["disk2", "disk3"], false), &frontend)
        .unwrap();

    assert!(summary.cancelled);
    assert!(summary.outcomes.is_empty());
    assert!(driver.calls_to("erase").is_empty());
    assert_eq!(
        *frontend.prompts.borrow(),
        vec!["Are you sure you want to continue?".to_string()]
    );
    assert!(frontend.said("This will ERASE ALL DATA on 2 drives: disk2, disk3"));
    assert!(frontend.said("Format cancelled."));
}

#[test]
fn invalid_thresholds_fail_before_touching_devices() {
    let driver = MockDriver::default();
    let running = AtomicBool::new(true);
    let frontend = ScriptedFrontend::default();

    let mut req = request(&["disk2"], false);
    req.thresholds = Thresholds {
        extremely_slow: 10.0,
        ..Thresholds::default()
    };
    let err = Formatter::new(&driver, &running)
        .run(&req, &frontend)
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::ExtremelySlowAboveVerySlow)
    ));
    assert!(driver.calls().is_empty());
}

#[test]
fn empty_request_is_an_error() {
    let driver = MockDriver::default();
    let running = AtomicBool::new(true);
    let frontend = ScriptedFrontend::default();

    assert!(
        Formatter::new(&driver, &running)
            .run(&request(&[], true), &frontend)
            .is_err()
    );
    assert!(driver.calls().is_empty());
}

#[test]
fn failed_erase_keeps_tool_output_and_skips_eject() {
    let driver = MockDriver {
        failing: ["disk3".to_string()].into(),
        ..MockDriver::default()
    };
    let running = AtomicBool::new(true);
    let frontend = ScriptedFrontend::default();

    let summary = Formatter::new(&driver, &running)
        .run(&request(&["disk2", "disk3"], true), &frontend)
        .unwrap();

    let failed = summary
        .outcomes
        .iter()
        .find(|o| o.device == "disk3")
        .unwrap();
    let detail = failed.detail.as_deref().unwrap();
    assert!(detail.contains("diskutil failed"));
    assert!(detail.contains("Couldn't open device"));
    assert!(frontend.said("[disk3] FAILED: diskutil failed"));

    assert_eq!(driver.calls_to("eject"), vec!["eject disk2"]);
    assert!(frontend.said("[disk2] Ejected successfully"));
}

#[test]
fn erase_progress_never_goes_backwards() {
    let driver = MockDriver {
        script: DISKUTIL_SESSION.to_vec(),
        ..MockDriver::default()
    };
    let running = AtomicBool::new(true);
    let frontend = ScriptedFrontend::default();

    let summary = Formatter::new(&driver, &running)
        .run(&request(&["disk2"], true), &frontend)
        .unwrap();
    assert!(summary.all_succeeded());

    let progress = frontend.progress.borrow();
    let percents: Vec<f64> = progress
        .iter()
        .filter(|(device, line, _)| device == "disk2" && line.starts_with("Format"))
        .map(|(_, line, _)| percent(line))
        .collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");

    let (_, last, done) = progress.last().unwrap();
    assert!(*done);
    assert_eq!(percent(last), 100.0);

    let logs = frontend.logs.borrow();
    assert!(logs.contains(&("disk2".to_string(), "Mounting disk".to_string())));
    assert!(logs.contains(&(
        "disk2".to_string(),
        "Formatting disk2s1 as MS-DOS (FAT32) with name REKORDBOX".to_string()
    )));
    assert_eq!(logs.len(), DISKUTIL_SESSION.len());
}

#[test]
fn concurrent_output_stays_tagged_with_its_device() {
    let driver = MockDriver {
        script: DISKUTIL_SESSION.to_vec(),
        ..MockDriver::default()
    };
    let running = AtomicBool::new(true);
    let frontend = ScriptedFrontend::default();

    Formatter::new(&driver, &running)
        .run(&request(&["disk2", "disk3"], true), &frontend)
        .unwrap();

    let logs = frontend.logs.borrow();
    for device in ["disk2", "disk3"] {
        assert!(logs.contains(&(device.to_string(), "Starting format...".to_string())));
        assert!(logs.contains(&(device.to_string(), "Mounting disk".to_string())));
    }
    let finished: HashSet<String> = frontend
        .progress
        .borrow()
        .iter()
        .filter(|(_, _, done)| *done)
        .map(|(device, _, _)| device.clone())
        .collect();
    assert_eq!(finished.len(), 2);
}

#[test]
fn declining_eject_leaves_drives_mounted() {
    let driver = MockDriver::default();
    let running = AtomicBool::new(true);
    let frontend = ScriptedFrontend::answering(&[true, false]);

    let summary = Formatter::new(&driver, &running)
        .run(&request(&["disk2", "disk3"], false), &frontend)
        .unwrap();

    assert!(summary.all_succeeded());
    assert!(driver.calls_to("eject").is_empty());
    assert_eq!(
        frontend.prompts.borrow().last().unwrap(),
        "Do you want to eject all newly formatted drives?"
    );
}

#[test]
fn large_drive_gets_a_warning_but_is_formatted() {
    let driver = MockDriver {
        sizes: [("disk2".to_string(), 2000.0)].into(),
        ..MockDriver::default()
    };
    let running = AtomicBool::new(true);
    let frontend = ScriptedFrontend::default();

    let summary = Formatter::new(&driver, &running)
        .run(&request(&["disk2"], true), &frontend)
        .unwrap();

    assert!(summary.all_succeeded());
    assert!(frontend.said("over 1TB"));
}

fn tiny_benchmark() -> BenchmarkConfig {
    BenchmarkConfig {
        initial_sample: MIB,
        max_sample: MIB,
        chunk_size: (MIB / 4) as usize,
        min_duration: Duration::ZERO,
    }
}

fn slow_drive_setup() -> (tempfile::TempDir, MockDriver, FormatRequest) {
    let dir = tempfile::tempdir().unwrap();
    let driver = MockDriver {
        mount: Some(dir.path().to_path_buf()),
        ..MockDriver::default()
    };
    let mut req = request(&["disk2"], false);
    // Anything a real disk can reach is below this.
    req.thresholds = Thresholds {
        prompt: 1.0e12,
        ..Thresholds::default()
    };
    (dir, driver, req)
}

#[test]
fn slow_single_drive_can_be_abandoned() {
    let (dir, driver, req) = slow_drive_setup();
    let running = AtomicBool::new(true);
    let frontend = ScriptedFrontend::answering(&[false]);

    let summary = Formatter::new(&driver, &running)
        .with_benchmark_config(tiny_benchmark())
        .run(&req, &frontend)
        .unwrap();

    assert!(summary.cancelled);
    assert!(driver.calls_to("erase").is_empty());
    assert_eq!(
        *frontend.prompts.borrow(),
        vec!["Do you want to proceed anyway?".to_string()]
    );
    assert!(frontend.said("Benchmarking disk2 to check performance..."));
    assert!(frontend.said("Write Speed:"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn slow_single_drive_can_be_accepted() {
    let (_dir, driver, req) = slow_drive_setup();
    let running = AtomicBool::new(true);
    let frontend = ScriptedFrontend::answering(&[true, true, true]);

    let summary = Formatter::new(&driver, &running)
        .with_benchmark_config(tiny_benchmark())
        .run(&req, &frontend)
        .unwrap();

    assert!(summary.all_succeeded());
    assert_eq!(
        *frontend.prompts.borrow(),
        vec![
            "Do you want to proceed anyway?".to_string(),
            "Are you sure you want to continue?".to_string(),
            "Do you want to eject the newly formatted drive?".to_string(),
        ]
    );
    assert_eq!(driver.calls_to("erase"), vec!["erase disk2 REKORDBOX"]);
    assert_eq!(driver.calls_to("eject"), vec!["eject disk2"]);
}
