use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Argument list for one codec invocation. Arguments may contain `{name}`
/// placeholders which are substituted by [`ArgTemplate::render`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArgTemplate(Vec<String>);

impl ArgTemplate {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(args.into_iter().map(Into::into).collect())
    }

    /// Live DASH output read from stdin. Keeps a short rolling window of
    /// segments next to `manifest.mpd`.
    pub fn dash_live() -> Self {
        Self::new([
            "-hide_banner",
            "-loglevel",
            "error",
            "-fflags",
            "+genpts",
            "-i",
            "pipe:0",
            "-an",
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-tune",
            "zerolatency",
            "-s",
            "{width}x{height}",
            "-r",
            "{framerate}",
            "-b:v",
            "{bitrate}",
            "-f",
            "dash",
            "-seg_duration",
            "2",
            "-window_size",
            "5",
            "-extra_window_size",
            "5",
            "-remove_at_exit",
            "0",
            "{output}",
        ])
    }

    /// Recording DASH output read from stdin. Every segment stays listed in
    /// the manifest so the recording can be flattened later.
    pub fn dash_record() -> Self {
        Self::new([
            "-hide_banner",
            "-loglevel",
            "error",
            "-fflags",
            "+genpts",
            "-i",
            "pipe:0",
            "-an",
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-s",
            "{width}x{height}",
            "-r",
            "{framerate}",
            "-b:v",
            "{bitrate}",
            "-f",
            "dash",
            "-seg_duration",
            "4",
            "-window_size",
            "0",
            "{output}",
        ])
    }

    /// Flatten a recorded manifest into a single MP4 by stream copy.
    pub fn mp4_convert() -> Self {
        Self::new([
            "-hide_banner",
            "-loglevel",
            "error",
            "-i",
            "{input}",
            "-c",
            "copy",
            "-movflags",
            "+faststart",
            "{output}",
        ])
    }

    pub fn args(&self) -> &[String] {
        &self.0
    }

    pub fn render(&self, vars: &TemplateVars) -> Vec<String> {
        self.0.iter().map(|arg| vars.substitute(arg)).collect()
    }
}

impl Display for ArgTemplate {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.0.join(" "))
    }
}

/// Values substituted into an [`ArgTemplate`].
#[derive(Clone, Debug, Default)]
pub struct TemplateVars {
    values: BTreeMap<&'static str, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(name, value.into());
        self
    }

    pub fn input(self, path: &Path) -> Self {
        self.set("input", path.to_string_lossy())
    }

    pub fn output(self, path: &Path) -> Self {
        self.set("output", path.to_string_lossy())
    }

    pub fn camera_id(self, id: &str) -> Self {
        self.set("camera_id", id)
    }

    pub fn encode(self, width: u32, height: u32, framerate: u32, bitrate: &str) -> Self {
        self.set("width", width.to_string())
            .set("height", height.to_string())
            .set("framerate", framerate.to_string())
            .set("bitrate", bitrate)
    }

    /// Single left-to-right pass: substituted values are never expanded
    /// again. Unknown placeholders are left untouched.
    fn substitute(&self, arg: &str) -> String {
        let mut out = String::with_capacity(arg.len());
        let mut rest = arg;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            let value = tail
                .find('}')
                .and_then(|end| self.values.get(&tail[1..end]).map(|value| (end, value)));
            match value {
                Some((end, value)) => {
                    out.push_str(value);
                    rest = &tail[end + 1..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_render_substitutes_known_placeholders() {
        let template = ArgTemplate::new(["-s", "{width}x{height}", "-b:v", "{bitrate}", "{output}"]);
        let vars = TemplateVars::new()
            .encode(1280, 720, 25, "2M")
            .output(&PathBuf::from("/tmp/cam/manifest.mpd"));

        assert_eq!(
            template.render(&vars),
            vec!["-s", "1280x720", "-b:v", "2M", "/tmp/cam/manifest.mpd"]
        );
    }

    #[test]
    fn test_render_keeps_unknown_placeholders() {
        let template = ArgTemplate::new(["-metadata", "title={title}", "{camera_id}"]);
        let vars = TemplateVars::new().camera_id("cam-1");

        assert_eq!(template.render(&vars), vec!["-metadata", "title={title}", "cam-1"]);
    }

    #[test]
    fn test_substituted_values_are_not_expanded_again() {
        let template = ArgTemplate::new(["{camera_id}:{width}", "{{width}}", "{bad"]);
        let vars = TemplateVars::new()
            .camera_id("{width}")
            .encode(640, 480, 30, "1M");

        assert_eq!(template.render(&vars), vec!["{width}:640", "{640}", "{bad"]);
    }

    #[test]
    fn test_default_templates_read_stdin_and_write_output() {
        for template in [ArgTemplate::dash_live(), ArgTemplate::dash_record()] {
            assert!(template.args().iter().any(|a| a == "pipe:0"));
            assert_eq!(template.args().last().map(String::as_str), Some("{output}"));
        }

        let convert = ArgTemplate::mp4_convert();
        assert!(convert.args().iter().any(|a| a == "{input}"));
        assert!(!convert.args().iter().any(|a| a == "pipe:0"));
    }
}
