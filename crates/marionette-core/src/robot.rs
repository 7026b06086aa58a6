//! Robot description parsing
//!
//! The robot model is described in a URDF-style XML document: named links
//! carrying visual geometry, connected by named joints with an origin, an
//! axis and optional limits.

use quick_xml::de::from_str;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to parse robot description: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid robot description: {0}")]
    ValidationError(String),
}

/// Origin of a joint or visual relative to its parent frame
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Origin {
    #[serde(rename = "@xyz", default)]
    pub xyz: Option<String>,
    #[serde(rename = "@rpy", default)]
    pub rpy: Option<String>,
}

impl Origin {
    /// Parse into `[x, y, z, roll, pitch, yaw]`
    pub fn parse(&self) -> Result<[f64; 6], ModelError> {
        let xyz = match &self.xyz {
            Some(s) => parse_triple(s)?,
            None => [0.0; 3],
        };
        let rpy = match &self.rpy {
            Some(s) => parse_triple(s)?,
            None => [0.0; 3],
        };
        Ok([xyz[0], xyz[1], xyz[2], rpy[0], rpy[1], rpy[2]])
    }
}

/// Parse a whitespace-separated list of three numbers
pub fn parse_triple(s: &str) -> Result<[f64; 3], ModelError> {
    let parts: Vec<f64> = s
        .split_whitespace()
        .map(|p| p.parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| ModelError::ParseError(format!("invalid number in '{}': {}", s, e)))?;

    match parts.as_slice() {
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err(ModelError::ParseError(format!(
            "expected 3 values, got {} in '{}'",
            parts.len(),
            s
        ))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeshGeometry {
    #[serde(rename = "@filename")]
    pub filename: String,
    #[serde(rename = "@scale", default)]
    pub scale: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoxGeometry {
    #[serde(rename = "@size")]
    pub size: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CylinderGeometry {
    #[serde(rename = "@radius")]
    pub radius: f64,
    #[serde(rename = "@length")]
    pub length: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SphereGeometry {
    #[serde(rename = "@radius")]
    pub radius: f64,
}

/// Geometry element; exactly one child is expected
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeometryElement {
    #[serde(default)]
    pub mesh: Option<MeshGeometry>,
    #[serde(rename = "box", default)]
    pub cuboid: Option<BoxGeometry>,
    #[serde(default)]
    pub cylinder: Option<CylinderGeometry>,
    #[serde(default)]
    pub sphere: Option<SphereGeometry>,
}

/// Resolved visual geometry
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Mesh { filename: String, scale: [f64; 3] },
    Box { size: [f64; 3] },
    Cylinder { radius: f64, length: f64 },
    Sphere { radius: f64 },
}

impl GeometryElement {
    pub fn resolve(&self) -> Result<Geometry, ModelError> {
        if let Some(mesh) = &self.mesh {
            let scale = match &mesh.scale {
                Some(s) => parse_triple(s)?,
                None => [1.0; 3],
            };
            return Ok(Geometry::Mesh {
                filename: mesh.filename.clone(),
                scale,
            });
        }
        if let Some(b) = &self.cuboid {
            return Ok(Geometry::Box {
                size: parse_triple(&b.size)?,
            });
        }
        if let Some(c) = &self.cylinder {
            return Ok(Geometry::Cylinder {
                radius: c.radius,
                length: c.length,
            });
        }
        if let Some(s) = &self.sphere {
            return Ok(Geometry::Sphere { radius: s.radius });
        }
        Err(ModelError::ValidationError(
            "geometry element has no mesh, box, cylinder or sphere".to_string(),
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColorElement {
    #[serde(rename = "@rgba")]
    pub rgba: String,
}

/// Material reference, either inline or naming a top-level material
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MaterialElement {
    #[serde(rename = "@name", default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<ColorElement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Visual {
    #[serde(rename = "@name", default)]
    pub name: Option<String>,
    #[serde(default)]
    pub origin: Option<Origin>,
    pub geometry: GeometryElement,
    #[serde(default)]
    pub material: Option<MaterialElement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(default)]
    pub visual: Vec<Visual>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkRef {
    #[serde(rename = "@link")]
    pub link: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AxisElement {
    #[serde(rename = "@xyz")]
    pub xyz: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitElement {
    #[serde(rename = "@lower", default)]
    pub lower: Option<f64>,
    #[serde(rename = "@upper", default)]
    pub upper: Option<f64>,
}

/// Kind of a joint, from the `type` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointKind {
    Revolute,
    Continuous,
    Prismatic,
    Fixed,
}

impl JointKind {
    pub fn parse(s: &str) -> Result<Self, ModelError> {
        match s.to_lowercase().as_str() {
            "revolute" => Ok(JointKind::Revolute),
            "continuous" => Ok(JointKind::Continuous),
            "prismatic" => Ok(JointKind::Prismatic),
            "fixed" => Ok(JointKind::Fixed),
            other => Err(ModelError::ValidationError(format!(
                "unsupported joint type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Joint {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@type")]
    pub joint_type: String,
    pub parent: LinkRef,
    pub child: LinkRef,
    #[serde(default)]
    pub origin: Option<Origin>,
    #[serde(default)]
    pub axis: Option<AxisElement>,
    #[serde(default)]
    pub limit: Option<LimitElement>,
}

impl Joint {
    pub fn kind(&self) -> Result<JointKind, ModelError> {
        JointKind::parse(&self.joint_type)
    }

    /// Joint axis, defaulting to +X as URDF does
    pub fn axis(&self) -> Result<[f64; 3], ModelError> {
        match &self.axis {
            Some(a) => parse_triple(&a.xyz),
            None => Ok([1.0, 0.0, 0.0]),
        }
    }

    pub fn limits(&self) -> Option<(f64, f64)> {
        let limit = self.limit.as_ref()?;
        Some((
            limit.lower.unwrap_or(f64::NEG_INFINITY),
            limit.upper.unwrap_or(f64::INFINITY),
        ))
    }
}

/// Top-level named material
#[derive(Debug, Clone, Deserialize)]
pub struct NamedMaterial {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(default)]
    pub color: Option<ColorElement>,
}

/// Root `<robot>` element
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "robot")]
pub struct RobotDescription {
    #[serde(rename = "@name", default)]
    pub name: String,
    #[serde(default)]
    pub link: Vec<Link>,
    #[serde(default)]
    pub joint: Vec<Joint>,
    #[serde(default)]
    pub material: Vec<NamedMaterial>,
}

impl RobotDescription {
    /// Parse and validate a description from XML
    pub fn from_xml(xml: &str) -> Result<Self, ModelError> {
        let robot: RobotDescription =
            from_str(xml).map_err(|e| ModelError::ParseError(e.to_string()))?;
        robot.validate()?;
        Ok(robot)
    }

    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_xml(&content)
    }

    /// Check that joints reference known links, every link has at most one
    /// parent joint, and there is exactly one root
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut names = HashSet::new();
        for link in &self.link {
            if !names.insert(link.name.as_str()) {
                return Err(ModelError::ValidationError(format!(
                    "duplicate link '{}'",
                    link.name
                )));
            }
        }

        let mut has_parent = HashSet::new();
        for joint in &self.joint {
            joint.kind()?;
            joint.axis()?;
            if let Some(origin) = &joint.origin {
                origin.parse()?;
            }
            for end in [&joint.parent.link, &joint.child.link] {
                if !names.contains(end.as_str()) {
                    return Err(ModelError::ValidationError(format!(
                        "joint '{}' references unknown link '{}'",
                        joint.name, end
                    )));
                }
            }
            if !has_parent.insert(joint.child.link.as_str()) {
                return Err(ModelError::ValidationError(format!(
                    "link '{}' has more than one parent joint",
                    joint.child.link
                )));
            }
        }

        let roots: Vec<&str> = self
            .link
            .iter()
            .map(|l| l.name.as_str())
            .filter(|n| !has_parent.contains(n))
            .collect();
        if roots.len() != 1 {
            return Err(ModelError::ValidationError(format!(
                "expected exactly one root link, found {}",
                roots.len()
            )));
        }

        // Every link must be reachable from the root; anything else is a cycle
        if self.links_in_order().len() != self.link.len() {
            return Err(ModelError::ValidationError(
                "joint graph contains a cycle".to_string(),
            ));
        }
        Ok(())
    }

    pub fn root_link(&self) -> Option<&Link> {
        let children: HashSet<&str> = self.joint.iter().map(|j| j.child.link.as_str()).collect();
        self.link.iter().find(|l| !children.contains(l.name.as_str()))
    }

    pub fn find_link(&self, name: &str) -> Option<&Link> {
        self.link.iter().find(|l| l.name == name)
    }

    /// Joint whose child is the given link
    pub fn parent_joint(&self, link: &str) -> Option<&Joint> {
        self.joint.iter().find(|j| j.child.link == link)
    }

    /// Link names in breadth-first order from the root (parents before children)
    pub fn links_in_order(&self) -> Vec<String> {
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for joint in &self.joint {
            children
                .entry(joint.parent.link.as_str())
                .or_default()
                .push(joint.child.link.as_str());
        }

        let mut order = Vec::new();
        let Some(root) = self.root_link() else {
            return order;
        };
        let mut seen = HashSet::new();
        let mut queue = std::collections::VecDeque::from([root.name.as_str()]);
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name) {
                continue;
            }
            order.push(name.to_string());
            if let Some(kids) = children.get(name) {
                queue.extend(kids.iter().copied());
            }
        }
        order
    }

    /// Ancestor chain of a link, nearest first, including the link itself
    pub fn ancestors(&self, link: &str) -> Vec<String> {
        let mut chain = vec![link.to_string()];
        let mut current = link;
        while let Some(joint) = self.parent_joint(current) {
            current = joint.parent.link.as_str();
            if chain.iter().any(|c| c == current) {
                break;
            }
            chain.push(current.to_string());
        }
        chain
    }

    /// Resolve a visual's color: inline color first, then the named top-level material
    pub fn visual_color(&self, visual: &Visual) -> Result<Option<[f32; 4]>, ModelError> {
        let Some(material) = &visual.material else {
            return Ok(None);
        };
        if let Some(color) = &material.color {
            return parse_rgba(&color.rgba).map(Some);
        }
        let Some(name) = &material.name else {
            return Ok(None);
        };
        match self
            .material
            .iter()
            .find(|m| &m.name == name)
            .and_then(|m| m.color.as_ref())
        {
            Some(color) => parse_rgba(&color.rgba).map(Some),
            None => Ok(None),
        }
    }
}

/// Parse an `rgba` attribute
pub fn parse_rgba(s: &str) -> Result<[f32; 4], ModelError> {
    let parts: Vec<f32> = s
        .split_whitespace()
        .map(|p| p.parse::<f32>())
        .collect::<Result<_, _>>()
        .map_err(|e| ModelError::ParseError(format!("invalid color '{}': {}", s, e)))?;
    match parts.as_slice() {
        [r, g, b, a] => Ok([*r, *g, *b, *a]),
        [r, g, b] => Ok([*r, *g, *b, 1.0]),
        _ => Err(ModelError::ParseError(format!("invalid color '{}'", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROBOT: &str = r#"<?xml version="1.0"?>
<robot name="mini">
    <material name="dark"><color rgba="0.1 0.1 0.1 1"/></material>
    <link name="base">
        <visual name="base_shell">
            <geometry><box size="0.1 0.1 0.02"/></geometry>
            <material name="dark"/>
        </visual>
    </link>
    <link name="body">
        <visual>
            <origin xyz="0 0 0.05"/>
            <geometry><mesh filename="meshes/body.glb" scale="0.001 0.001 0.001"/></geometry>
            <material><color rgba="0.9 0.9 0.9 1"/></material>
        </visual>
    </link>
    <link name="head"/>
    <joint name="yaw_body" type="revolute">
        <parent link="base"/>
        <child link="body"/>
        <origin xyz="0 0 0.02" rpy="0 0 0"/>
        <axis xyz="0 0 1"/>
        <limit lower="-2.8" upper="2.8"/>
    </joint>
    <joint name="neck" type="fixed">
        <parent link="body"/>
        <child link="head"/>
        <origin xyz="0 0 0.1"/>
    </joint>
</robot>"#;

    #[test]
    fn test_parse_robot() {
        let robot = RobotDescription::from_xml(ROBOT).unwrap();
        assert_eq!(robot.name, "mini");
        assert_eq!(robot.link.len(), 3);
        assert_eq!(robot.joint.len(), 2);
        assert_eq!(robot.root_link().unwrap().name, "base");
        assert_eq!(robot.links_in_order(), vec!["base", "body", "head"]);

        let yaw = &robot.joint[0];
        assert_eq!(yaw.kind().unwrap(), JointKind::Revolute);
        assert_eq!(yaw.axis().unwrap(), [0.0, 0.0, 1.0]);
        assert_eq!(yaw.limits(), Some((-2.8, 2.8)));
        assert_eq!(robot.joint[1].axis().unwrap(), [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_visual_geometry_and_color() {
        let robot = RobotDescription::from_xml(ROBOT).unwrap();
        let base = robot.find_link("base").unwrap();
        assert_eq!(
            base.visual[0].geometry.resolve().unwrap(),
            Geometry::Box { size: [0.1, 0.1, 0.02] }
        );
        assert_eq!(robot.visual_color(&base.visual[0]).unwrap(), Some([0.1, 0.1, 0.1, 1.0]));

        let body = robot.find_link("body").unwrap();
        match body.visual[0].geometry.resolve().unwrap() {
            Geometry::Mesh { filename, scale } => {
                assert_eq!(filename, "meshes/body.glb");
                assert_eq!(scale, [0.001, 0.001, 0.001]);
            }
            other => panic!("unexpected geometry {:?}", other),
        }
        assert_eq!(robot.visual_color(&body.visual[0]).unwrap(), Some([0.9, 0.9, 0.9, 1.0]));
    }

    #[test]
    fn test_ancestors() {
        let robot = RobotDescription::from_xml(ROBOT).unwrap();
        assert_eq!(robot.ancestors("head"), vec!["head", "body", "base"]);
        assert_eq!(robot.ancestors("base"), vec!["base"]);
    }

    #[test]
    fn test_rejects_unknown_link() {
        let xml = r#"<robot name="bad">
            <link name="a"/>
            <joint name="j" type="fixed"><parent link="a"/><child link="missing"/></joint>
        </robot>"#;
        assert!(matches!(
            RobotDescription::from_xml(xml),
            Err(ModelError::ValidationError(_))
        ));
    }

    #[test]
    fn test_rejects_multiple_roots() {
        let xml = r#"<robot name="bad"><link name="a"/><link name="b"/></robot>"#;
        assert!(RobotDescription::from_xml(xml).is_err());
    }

    #[test]
    fn test_parse_triple_errors() {
        assert_eq!(parse_triple("1 2 3").unwrap(), [1.0, 2.0, 3.0]);
        assert!(parse_triple("1 2").is_err());
        assert!(parse_triple("1 x 3").is_err());
        assert_eq!(parse_rgba("0.5 0.5 0.5").unwrap(), [0.5, 0.5, 0.5, 1.0]);
    }
}
