//! Runtime-environment capability probe.
//!
//! Some environments route microphone capture through an interposed audio
//! bridge that drops streams under load, which shows up as recurring
//! network-class recognition errors. The probe lives here, behind one named
//! function, so the heuristic can be swapped without touching the bounded
//! retry algorithm in `backoff`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentTag {
    Standard,
    /// Audio backend known to drop capture streams (e.g. WSL's bridge).
    KnownUnreliableAudio,
}

/// Classify the current runtime environment.
#[must_use]
pub fn probe_environment() -> EnvironmentTag {
    let os_release =
        std::fs::read_to_string("/proc/sys/kernel/osrelease").unwrap_or_default();
    let wsl_distro = std::env::var("WSL_DISTRO_NAME").ok();
    classify(&os_release, wsl_distro.as_deref())
}

fn classify(os_release: &str, wsl_distro: Option<&str>) -> EnvironmentTag {
    if wsl_distro.is_some_and(|name| !name.is_empty()) {
        return EnvironmentTag::KnownUnreliableAudio;
    }
    if os_release.to_ascii_lowercase().contains("microsoft") {
        return EnvironmentTag::KnownUnreliableAudio;
    }
    EnvironmentTag::Standard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_kernels_classify_as_standard() {
        assert_eq!(classify("6.8.0-41-generic", None), EnvironmentTag::Standard);
        assert_eq!(classify("", None), EnvironmentTag::Standard);
    }

    #[test]
    fn wsl_markers_classify_as_unreliable() {
        assert_eq!(
            classify("5.15.153.1-microsoft-standard-WSL2", None),
            EnvironmentTag::KnownUnreliableAudio
        );
        assert_eq!(
            classify("6.8.0-41-generic", Some("Ubuntu-24.04")),
            EnvironmentTag::KnownUnreliableAudio
        );
    }

    #[test]
    fn empty_wsl_var_does_not_trip_the_probe() {
        assert_eq!(classify("6.8.0-41-generic", Some("")), EnvironmentTag::Standard);
    }
}
