//! The modules that make up the noise-suppression pipeline
//!
//! ```text
//! capture source ──loopback──▶ nui_mic_raw_in (LADSPA sink)
//!                                   │ sink_master
//!                                   ▼
//!                         nui_mic_denoised_out (null sink)
//!                                   │ .monitor
//!                                   ▼
//!                         nui_mic_remap (virtual source apps select)
//! ```

use std::fmt;
use std::path::Path;

use crate::pulse::ModuleRecord;

pub const NULL_SINK_NAME: &str = "nui_mic_denoised_out";
pub const FILTER_SINK_NAME: &str = "nui_mic_raw_in";
pub const REMAP_SOURCE_NAME: &str = "nui_mic_remap";
pub const LADSPA_LABEL: &str = "noise_suppressor_mono";
pub const REMAP_DESCRIPTION: &str = "Filtered Microphone";

/// Loopback latency for sources that can adapt their latency
const LOW_LATENCY_MSEC: u32 = 1;
/// Loopback latency for fixed-latency sources
const DEFAULT_LATENCY_MSEC: u32 = 50;

/// One module of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Element {
    NullSink,
    FilterSink,
    Loopback,
    RemapSource,
}

impl Element {
    /// Order in which `enable` loads the elements
    pub const BUILD_ORDER: [Element; 4] = [
        Element::NullSink,
        Element::FilterSink,
        Element::Loopback,
        Element::RemapSource,
    ];

    pub fn module_name(self) -> &'static str {
        match self {
            Element::NullSink => "module-null-sink",
            Element::FilterSink => "module-ladspa-sink",
            Element::Loopback => "module-loopback",
            Element::RemapSource => "module-remap-source",
        }
    }

    /// Whether `module` is this element (identity only, not wiring)
    pub fn matches(self, module: &ModuleRecord) -> bool {
        if module.name != self.module_name() {
            return false;
        }
        let (key, value) = self.identity();
        module.arg(key).as_deref() == Some(value)
    }

    /// Whether `module` is wired the way `enable` builds it
    fn is_wired(self, module: &ModuleRecord) -> bool {
        match self {
            Element::NullSink | Element::Loopback => true,
            Element::FilterSink => module.arg("sink_master").as_deref() == Some(NULL_SINK_NAME),
            Element::RemapSource => {
                let monitor = format!("{}.monitor", NULL_SINK_NAME);
                module.arg("master").as_deref() == Some(monitor.as_str())
            }
        }
    }

    fn identity(self) -> (&'static str, &'static str) {
        match self {
            Element::NullSink => ("sink_name", NULL_SINK_NAME),
            Element::FilterSink => ("sink_name", FILTER_SINK_NAME),
            Element::Loopback => ("sink", FILTER_SINK_NAME),
            Element::RemapSource => ("source_name", REMAP_SOURCE_NAME),
        }
    }

    /// Module argument string for loading this element
    pub fn argument(self, params: &FilterParams<'_>) -> String {
        match self {
            Element::NullSink => format!("sink_name={} rate=48000", NULL_SINK_NAME),
            Element::FilterSink => format!(
                "sink_name={} sink_master={} label={} plugin=\"{}\" control={}",
                FILTER_SINK_NAME,
                NULL_SINK_NAME,
                LADSPA_LABEL,
                params.plugin_path.display(),
                params.threshold
            ),
            Element::Loopback => {
                let latency = if params.dynamic_latency {
                    LOW_LATENCY_MSEC
                } else {
                    DEFAULT_LATENCY_MSEC
                };
                format!(
                    "source={} sink={} channels=1 latency_msec={} source_dont_move=true sink_dont_move=true",
                    params.source_id, FILTER_SINK_NAME, latency
                )
            }
            Element::RemapSource => format!(
                "master={}.monitor source_name={} source_properties=\"device.description='{}'\"",
                NULL_SINK_NAME, REMAP_SOURCE_NAME, REMAP_DESCRIPTION
            ),
        }
    }
}

/// The three graph-edit steps of `enable`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Create the null sink
    Sink,
    /// Filter sink plus loopback from the selected source
    FilterAttach,
    /// Expose the filtered stream as a virtual source
    Expose,
}

impl Step {
    pub const ALL: [Step; 3] = [Step::Sink, Step::FilterAttach, Step::Expose];

    pub fn elements(self) -> &'static [Element] {
        match self {
            Step::Sink => &[Element::NullSink],
            Step::FilterAttach => &[Element::FilterSink, Element::Loopback],
            Step::Expose => &[Element::RemapSource],
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Sink => "create the null sink",
            Step::FilterAttach => "attach the filter to the source",
            Step::Expose => "expose the virtual source",
        })
    }
}

/// Inputs that vary per `enable`
#[derive(Debug, Clone, Copy)]
pub struct FilterParams<'a> {
    pub source_id: &'a str,
    pub plugin_path: &'a Path,
    /// Voice activation threshold, 0-95
    pub threshold: u8,
    pub dynamic_latency: bool,
}

/// Which pipeline elements a module list contains
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Survey {
    found: Vec<(Element, ModuleRecord)>,
}

impl Survey {
    pub fn take(modules: &[ModuleRecord]) -> Self {
        let found = modules
            .iter()
            .filter_map(|module| {
                Element::BUILD_ORDER
                    .iter()
                    .find(|element| element.matches(module))
                    .map(|element| (*element, module.clone()))
            })
            .collect();
        Self { found }
    }

    pub fn is_empty(&self) -> bool {
        self.found.is_empty()
    }

    pub fn count(&self, element: Element) -> usize {
        self.found.iter().filter(|(e, _)| *e == element).count()
    }

    /// Every element present exactly once and wired as `enable` builds it
    pub fn is_complete(&self) -> bool {
        Element::BUILD_ORDER
            .iter()
            .all(|element| self.count(*element) == 1)
            && self.found.iter().all(|(element, module)| element.is_wired(module))
    }

    /// Module indices in teardown order (reverse of build order)
    pub fn teardown_order(&self) -> Vec<(Element, u32)> {
        let mut items: Vec<(Element, u32)> = self
            .found
            .iter()
            .map(|(element, module)| (*element, module.index))
            .collect();
        items.sort_by_key(|(element, index)| {
            let rank = Element::BUILD_ORDER
                .iter()
                .position(|e| e == element)
                .unwrap_or(0);
            (std::cmp::Reverse(rank), std::cmp::Reverse(*index))
        });
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn module(index: u32, element: Element) -> ModuleRecord {
        let plugin = PathBuf::from("/tmp/librnnoise-abc.so");
        let params = FilterParams {
            source_id: "alsa_input.usb0",
            plugin_path: &plugin,
            threshold: 95,
            dynamic_latency: true,
        };
        ModuleRecord {
            index,
            name: element.module_name().to_string(),
            argument: element.argument(&params),
        }
    }

    fn full_graph() -> Vec<ModuleRecord> {
        Element::BUILD_ORDER
            .iter()
            .enumerate()
            .map(|(i, e)| module(20 + i as u32, *e))
            .collect()
    }

    #[test]
    fn test_built_arguments_match_their_element() {
        for (i, element) in Element::BUILD_ORDER.iter().enumerate() {
            let m = module(i as u32, *element);
            assert!(element.matches(&m), "{:?} does not match itself", element);
            for other in Element::BUILD_ORDER.iter().filter(|o| *o != element) {
                assert!(!other.matches(&m), "{:?} matched {:?}", other, element);
            }
        }
    }

    #[test]
    fn test_filter_argument_references_plugin_and_threshold() {
        let m = module(1, Element::FilterSink);
        assert_eq!(m.arg("plugin").as_deref(), Some("/tmp/librnnoise-abc.so"));
        assert_eq!(m.arg("control").as_deref(), Some("95"));
        assert_eq!(m.arg("label").as_deref(), Some(LADSPA_LABEL));
    }

    #[test]
    fn test_plugin_path_with_spaces_stays_one_argument() {
        let plugin = PathBuf::from("/tmp/my temp dir/librnnoise-abc.so");
        let params = FilterParams {
            source_id: "alsa_input.usb0",
            plugin_path: &plugin,
            threshold: 95,
            dynamic_latency: true,
        };
        let m = ModuleRecord {
            index: 3,
            name: Element::FilterSink.module_name().to_string(),
            argument: Element::FilterSink.argument(&params),
        };
        assert_eq!(
            m.arg("plugin").as_deref(),
            Some("/tmp/my temp dir/librnnoise-abc.so")
        );
        assert_eq!(m.arg("control").as_deref(), Some("95"));
        assert!(Element::FilterSink.matches(&m));
    }

    #[test]
    fn test_loopback_latency_follows_source_capability() {
        let plugin = PathBuf::from("/tmp/x.so");
        let mut params = FilterParams {
            source_id: "src",
            plugin_path: &plugin,
            threshold: 50,
            dynamic_latency: true,
        };
        assert!(Element::Loopback.argument(&params).contains("latency_msec=1 "));
        params.dynamic_latency = false;
        assert!(Element::Loopback.argument(&params).contains("latency_msec=50 "));
    }

    #[test]
    fn test_survey_ignores_foreign_modules() {
        let modules = vec![
            ModuleRecord {
                index: 1,
                name: "module-null-sink".to_string(),
                argument: "sink_name=someone_else".to_string(),
            },
            ModuleRecord {
                index: 2,
                name: "module-loopback".to_string(),
                argument: "source=a sink=b".to_string(),
            },
        ];
        assert!(Survey::take(&modules).is_empty());
    }

    #[test]
    fn test_survey_complete_and_partial() {
        let graph = full_graph();
        assert!(Survey::take(&graph).is_complete());

        let partial = &graph[..2];
        let survey = Survey::take(partial);
        assert!(!survey.is_empty());
        assert!(!survey.is_complete());
    }

    #[test]
    fn test_survey_duplicate_is_not_complete() {
        let mut graph = full_graph();
        graph.push(module(99, Element::Loopback));
        assert!(!Survey::take(&graph).is_complete());
    }

    #[test]
    fn test_survey_miswired_is_not_complete() {
        let mut graph = full_graph();
        graph[1].argument = format!(
            "sink_name={} sink_master=elsewhere label={}",
            FILTER_SINK_NAME, LADSPA_LABEL
        );
        assert!(!Survey::take(&graph).is_complete());
    }

    #[test]
    fn test_teardown_order_is_reverse_build_order() {
        let graph = full_graph();
        let order: Vec<Element> = Survey::take(&graph)
            .teardown_order()
            .into_iter()
            .map(|(e, _)| e)
            .collect();
        assert_eq!(
            order,
            vec![
                Element::RemapSource,
                Element::Loopback,
                Element::FilterSink,
                Element::NullSink
            ]
        );
    }
}
