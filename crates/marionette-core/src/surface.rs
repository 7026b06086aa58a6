//! Surface classification
//!
//! Every visual of the robot description becomes a surface. Its class and
//! anatomical family are derived once, when the model is loaded, from link,
//! visual and material naming plus the origin color. Nothing re-derives these
//! heuristics afterwards.

use serde::{Deserialize, Serialize};

/// What kind of part a surface is, for material substitution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceClass {
    Antenna,
    Lens,
    Shell,
    Generic,
}

/// Anatomical grouping used to order the scan reveal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Base,
    Body,
    Stewart,
    Head,
    Camera,
    Antenna,
    Other,
}

impl Family {
    /// Fixed presentation order of the scan reveal
    pub const ORDER: [Family; 7] = [
        Family::Base,
        Family::Body,
        Family::Stewart,
        Family::Head,
        Family::Camera,
        Family::Antenna,
        Family::Other,
    ];

    pub fn rank(self) -> usize {
        Self::ORDER.iter().position(|f| *f == self).unwrap_or(Self::ORDER.len())
    }

    pub fn label(self) -> &'static str {
        match self {
            Family::Base => "base",
            Family::Body => "body",
            Family::Stewart => "stewart",
            Family::Head => "head",
            Family::Camera => "camera",
            Family::Antenna => "antenna",
            Family::Other => "other",
        }
    }
}

/// Link-name substrings that place a surface in a family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyRule {
    pub family: Family,
    pub patterns: Vec<String>,
}

impl FamilyRule {
    pub fn new(family: Family, patterns: &[&str]) -> Self {
        Self {
            family,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn matches(&self, link: &str) -> bool {
        let link = link.to_lowercase();
        self.patterns.iter().any(|p| link.contains(&p.to_lowercase()))
    }
}

/// Rules in match priority. Base is tested before body so that links such as
/// `body_foot` land in the base.
pub fn default_family_rules() -> Vec<FamilyRule> {
    vec![
        FamilyRule::new(Family::Camera, &["camera", "lens"]),
        FamilyRule::new(Family::Antenna, &["antenna"]),
        FamilyRule::new(Family::Head, &["head"]),
        FamilyRule::new(Family::Stewart, &["stewart", "rod", "arm", "passive", "ball"]),
        FamilyRule::new(Family::Base, &["base", "foot"]),
        FamilyRule::new(Family::Body, &["body", "torso", "yaw"]),
    ]
}

/// Rec. 709 relative luminance of a linear-ish RGB triple
pub fn luminance(rgb: [f32; 3]) -> f32 {
    0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2]
}

fn mentions(names: &[&str], needles: &[&str]) -> bool {
    names.iter().any(|name| {
        let name = name.to_lowercase();
        needles.iter().any(|n| name.contains(n))
    })
}

/// Classify a surface from its visual, link and material names and origin color
pub fn classify(
    visual_name: &str,
    link: &str,
    material_name: Option<&str>,
    color: Option<[f32; 4]>,
) -> SurfaceClass {
    let names = [visual_name, link, material_name.unwrap_or("")];

    if mentions(&names, &["antenna"]) {
        return SurfaceClass::Antenna;
    }
    if mentions(&names, &["lens", "glass"]) {
        return SurfaceClass::Lens;
    }
    // Dark translucent parts are lenses even when unnamed
    if let Some([r, g, b, a]) = color {
        if a < 0.5 && luminance([r, g, b]) < 0.25 {
            return SurfaceClass::Lens;
        }
    }
    if mentions(&names, &["shell", "cover", "case", "hull"]) {
        return SurfaceClass::Shell;
    }
    SurfaceClass::Generic
}

/// Outline surfaces are silhouette helpers, never scanned
pub fn is_outline(visual_name: &str, material_name: Option<&str>) -> bool {
    mentions(&[visual_name, material_name.unwrap_or("")], &["outline"])
}

/// Pick the family of a surface by walking its ancestor chain (nearest first)
/// and taking the first link matched by a rule
pub fn family_for(class: SurfaceClass, ancestors: &[String], rules: &[FamilyRule]) -> Family {
    if class == SurfaceClass::Antenna {
        return Family::Antenna;
    }
    for link in ancestors {
        if let Some(rule) = rules.iter().find(|r| r.matches(link)) {
            return rule.family;
        }
    }
    if class == SurfaceClass::Lens {
        return Family::Camera;
    }
    Family::Other
}
