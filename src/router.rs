//! Routing of resolved switch states to HTTP dispatch targets.
//!
//! A trigger is matched against an ordered list of `(filter, target)`
//! rules; every matching rule contributes one [`DispatchRecord`], so one
//! button press may fan out to several webhooks. URL and body templates
//! are expanded with the observed light state, and URL-prefix overlays
//! supply default methods and headers (authentication, typically).

use std::collections::HashMap;

use strum_macros::{Display, EnumString};

use crate::errors::Error;
use crate::tracker::SwitchState;

type Result<T> = std::result::Result<T, Error>;

/// HTTP method of a dispatch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    /// Parse a configured method name, case-insensitively.
    pub fn parse(s: &str) -> Result<Self> {
        s.parse().map_err(|_| Error::BadMethod(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    OnOff,
    Hue,
    Saturation,
    Brightness,
    Kelvin,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// A URL or body template with `{onoff}`-style placeholders.
///
/// Placeholder names are checked at parse time, so a bad template is a
/// configuration error rather than a per-request one. `{{` and `}}`
/// produce literal braces.
///
/// ```
/// use pop_http_rs::{SwitchState, Template};
///
/// let template = Template::parse("http://x/api?b={brightness}&s={onoff}").unwrap();
/// let state = SwitchState { hue: 0, saturation: 0, brightness: 32768, kelvin: 3500, power: true };
/// assert_eq!(template.expand(&state), "http://x/api?b=32768&s=on");
///
/// assert!(Template::parse("http://x/{color}").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct Template {
    raw: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(raw: &str) -> Result<Template> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => name.push(c),
                            None => {
                                return Err(Error::UnbalancedTemplate {
                                    template: raw.to_string(),
                                });
                            }
                        }
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(parse_placeholder(&name, raw)?));
                }
                '}' => {
                    return Err(Error::UnbalancedTemplate {
                        template: raw.to_string(),
                    });
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Template {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The template source text.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Substitute the placeholders with the observed state.
    pub fn expand(&self, state: &SwitchState) -> String {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(Placeholder::OnOff) => {
                    out.push_str(if state.power { "on" } else { "off" })
                }
                Segment::Placeholder(Placeholder::Hue) => out.push_str(&state.hue.to_string()),
                Segment::Placeholder(Placeholder::Saturation) => {
                    out.push_str(&state.saturation.to_string())
                }
                Segment::Placeholder(Placeholder::Brightness) => {
                    out.push_str(&state.brightness.to_string())
                }
                Segment::Placeholder(Placeholder::Kelvin) => {
                    out.push_str(&state.kelvin.to_string())
                }
            }
        }
        out
    }
}

fn parse_placeholder(name: &str, template: &str) -> Result<Placeholder> {
    match name {
        "onoff" => Ok(Placeholder::OnOff),
        "hue" => Ok(Placeholder::Hue),
        "saturation" => Ok(Placeholder::Saturation),
        "brightness" => Ok(Placeholder::Brightness),
        "kelvin" => Ok(Placeholder::Kelvin),
        _ => Err(Error::UnknownPlaceholder {
            name: name.to_string(),
            template: template.to_string(),
        }),
    }
}

/// Sparse predicate over a switch state.
///
/// `None` fields are wildcards; `Some` fields must equal the observed
/// value exactly. No ranges, no tolerance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchFilter {
    pub hue: Option<u16>,
    pub saturation: Option<u16>,
    pub brightness: Option<u16>,
    pub kelvin: Option<u16>,
    pub power: Option<bool>,
}

impl SwitchFilter {
    pub fn matches(&self, state: &SwitchState) -> bool {
        fn field<T: PartialEq>(want: Option<T>, got: T) -> bool {
            want.is_none_or(|w| w == got)
        }
        field(self.hue, state.hue)
            && field(self.saturation, state.saturation)
            && field(self.brightness, state.brightness)
            && field(self.kelvin, state.kelvin)
            && field(self.power, state.power)
    }
}

/// One configured webhook target.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub url: Template,
    pub method: Option<HttpMethod>,
    pub body: Option<Template>,
    pub headers: HashMap<String, String>,
}

impl TargetSpec {
    pub fn new(url: Template) -> Self {
        TargetSpec {
            url,
            method: None,
            body: None,
            headers: HashMap::new(),
        }
    }
}

/// Defaults applied to every target whose expanded URL starts with
/// `prefix`: a method used when the target names none, and base headers
/// the target's own headers override on collision.
#[derive(Debug, Clone)]
pub struct EndpointOverlay {
    pub prefix: String,
    pub method: Option<HttpMethod>,
    pub headers: HashMap<String, String>,
}

/// A fully resolved HTTP call description for one matched target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    pub url: String,
    pub method: HttpMethod,
    pub body: Option<String>,
    pub headers: HashMap<String, String>,
}

/// Maps a resolved switch state to the webhooks it should fire.
#[derive(Debug)]
pub struct Router {
    rules: Vec<(SwitchFilter, TargetSpec)>,
    default_target: Option<TargetSpec>,
    overlays: Vec<EndpointOverlay>,
}

impl Router {
    pub fn new(
        rules: Vec<(SwitchFilter, TargetSpec)>,
        default_target: Option<TargetSpec>,
        overlays: Vec<EndpointOverlay>,
    ) -> Self {
        Router {
            rules,
            default_target,
            overlays,
        }
    }

    /// Resolve one state into dispatch records, in rule declaration
    /// order. All matching rules contribute; the default target is used
    /// only when nothing matched, and an empty result means the action is
    /// unmapped (the caller logs that).
    pub fn resolve(&self, state: &SwitchState) -> Vec<DispatchRecord> {
        let mut targets: Vec<&TargetSpec> = self
            .rules
            .iter()
            .filter(|(filter, _)| filter.matches(state))
            .map(|(_, target)| target)
            .collect();

        if targets.is_empty()
            && let Some(default) = &self.default_target
        {
            targets.push(default);
        }

        targets
            .into_iter()
            .map(|target| self.resolve_target(target, state))
            .collect()
    }

    fn resolve_target(&self, target: &TargetSpec, state: &SwitchState) -> DispatchRecord {
        let url = target.url.expand(state);
        let overlay = self.overlay_for(&url);

        let method = target
            .method
            .or(overlay.and_then(|o| o.method))
            .unwrap_or_default();

        let mut headers = overlay.map(|o| o.headers.clone()).unwrap_or_default();
        for (key, value) in &target.headers {
            headers.insert(key.clone(), value.clone());
        }

        DispatchRecord {
            url,
            method,
            body: target.body.as_ref().map(|b| b.expand(state)),
            headers,
        }
    }

    // Longest matching prefix wins; among equal lengths the first
    // declared overlay is kept, so the pick is stable.
    fn overlay_for(&self, url: &str) -> Option<&EndpointOverlay> {
        let mut best: Option<&EndpointOverlay> = None;
        for overlay in &self.overlays {
            if url.starts_with(&overlay.prefix)
                && best.is_none_or(|b| overlay.prefix.len() > b.prefix.len())
            {
                best = Some(overlay);
            }
        }
        best
    }
}
