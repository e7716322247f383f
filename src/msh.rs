//! Mesh artifact in the Gmsh MSH 2.2 ASCII format.
//!
//! Only elements belonging to a physical group are written, once per group
//! membership, with the tag pair `(physical, elementary)`.

use std::{
    collections::HashMap,
    io::Write,
    path::Path,
};

use log::info;

use crate::{
    datatypes::{GroupMembers, Mesh, Vertex},
    error::{PlatemeshError, Result},
};

/// Gmsh element type of a 2-node line
pub const LINE: usize = 1;
/// Gmsh element type of a 3-node triangle
pub const TRIANGLE: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalName {
    pub dimension: usize,
    pub tag: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MshElement {
    pub kind: usize,
    pub physical: u32,
    pub elementary: usize,
    /// Zero-based node indices
    pub nodes: Vec<usize>,
}

/// Contents of an MSH 2.2 file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MshFile {
    pub physical_names: Vec<PhysicalName>,
    pub nodes: Vec<Vertex>,
    pub elements: Vec<MshElement>,
}

impl MshFile {
    pub fn count(&self, kind: usize) -> usize {
        self.elements.iter().filter(|e| e.kind == kind).count()
    }

    pub fn physical_name(&self, name: &str) -> Option<&PhysicalName> {
        self.physical_names.iter().find(|p| p.name == name)
    }
}

enum MeshParseState {
    Format,
    PhysicalNames,
    Nodes,
    Elements,
    Limbo,
}

/// Writes `mesh` and its physical groups
pub fn write_msh<W: Write>(mesh: &Mesh, out: &mut W) -> Result<()> {
    writeln!(out, "$MeshFormat\n2.2 0 8\n$EndMeshFormat")?;

    writeln!(out, "$PhysicalNames\n{}", mesh.groups.len())?;
    for group in &mesh.groups {
        writeln!(out, "{} {} \"{}\"", group.dimension(), group.tag, group.name)?;
    }
    writeln!(out, "$EndPhysicalNames")?;

    writeln!(out, "$Nodes\n{}", mesh.nodes.len())?;
    for (i, node) in mesh.nodes.iter().enumerate() {
        writeln!(out, "{} {} {} 0", i + 1, node.vertex.x, node.vertex.y)?;
    }
    writeln!(out, "$EndNodes")?;

    let mut lines: Vec<String> = Vec::new();
    for group in &mesh.groups {
        match &group.members {
            GroupMembers::Curves(curves) => {
                for segment in mesh.segments.iter().filter(|s| curves.contains(&s.curve)) {
                    lines.push(format!(
                        "{LINE} 2 {} {} {} {}",
                        group.tag,
                        segment.curve.0,
                        segment.nodes[0] + 1,
                        segment.nodes[1] + 1
                    ));
                }
            }
            GroupMembers::Surfaces(surfaces) => {
                for element in mesh
                    .elements
                    .iter()
                    .filter(|e| surfaces.contains(&e.surface))
                {
                    lines.push(format!(
                        "{TRIANGLE} 2 {} {} {} {} {}",
                        group.tag,
                        element.surface.0,
                        element.nodes[0] + 1,
                        element.nodes[1] + 1,
                        element.nodes[2] + 1
                    ));
                }
            }
        }
    }

    writeln!(out, "$Elements\n{}", lines.len())?;
    for (i, line) in lines.iter().enumerate() {
        writeln!(out, "{} {line}", i + 1)?;
    }
    writeln!(out, "$EndElements")?;

    Ok(())
}

pub fn save_msh(mesh: &Mesh, path: &Path) -> Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    write_msh(mesh, &mut file)?;
    file.flush()?;
    info!(
        "wrote {} with {} nodes and {} triangles",
        path.display(),
        mesh.nodes.len(),
        mesh.elements.len()
    );
    Ok(())
}

fn malformed(line: &str, what: &str) -> PlatemeshError {
    PlatemeshError::MeshNonConvergence(format!("malformed mesh file, {what}: \"{line}\""))
}

fn parse_fields<T: std::str::FromStr>(line: &str) -> Result<Vec<T>> {
    line.split_whitespace()
        .map(|f| f.parse::<T>().map_err(|_| malformed(line, "unexpected value")))
        .collect()
}

/// Parses MSH 2.2 ASCII contents
///
/// # Arguments
/// * `contents` - The text of the mesh file
///
/// # Returns
/// The physical names, nodes in file order and all elements
pub fn parse_msh(contents: &str) -> Result<MshFile> {
    let mut msh = MshFile::default();
    let mut parser_state = MeshParseState::Limbo;
    let mut parsed_section_metadata = false;
    let mut node_indexes: HashMap<usize, usize> = HashMap::new();
    let mut raw_elements: Vec<(usize, u32, usize, Vec<usize>)> = Vec::new();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("$End") {
            parser_state = MeshParseState::Limbo;
            continue;
        }

        match parser_state {
            MeshParseState::Limbo => {
                parsed_section_metadata = false;

                parser_state = match line {
                    "$MeshFormat" => MeshParseState::Format,
                    "$PhysicalNames" => MeshParseState::PhysicalNames,
                    "$Nodes" => MeshParseState::Nodes,
                    "$Elements" => MeshParseState::Elements,
                    _ => MeshParseState::Limbo,
                };
            }
            MeshParseState::Format => {
                if !line.starts_with("2.") {
                    return Err(malformed(line, "only MSH 2 files are supported"));
                }
            }
            MeshParseState::PhysicalNames => {
                if !parsed_section_metadata {
                    parsed_section_metadata = true;
                    continue;
                }
                let mut fields = line.splitn(3, ' ');
                let dimension = fields.next().and_then(|f| f.parse().ok());
                let tag = fields.next().and_then(|f| f.parse().ok());
                let name = fields.next().map(|f| f.trim().trim_matches('"').to_owned());
                match (dimension, tag, name) {
                    (Some(dimension), Some(tag), Some(name)) => {
                        msh.physical_names.push(PhysicalName {
                            dimension,
                            tag,
                            name,
                        })
                    }
                    _ => return Err(malformed(line, "bad physical name")),
                }
            }
            MeshParseState::Nodes => {
                if !parsed_section_metadata {
                    parsed_section_metadata = true;
                    continue;
                }
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() < 3 {
                    return Err(malformed(line, "node needs an id and coordinates"));
                }
                let id: usize = fields[0].parse().map_err(|_| malformed(line, "node id"))?;
                let coords: Vec<f64> = parse_fields(&fields[1..].join(" "))?;
                node_indexes.insert(id, msh.nodes.len());
                msh.nodes.push(Vertex {
                    x: coords[0],
                    y: coords[1],
                });
            }
            MeshParseState::Elements => {
                if !parsed_section_metadata {
                    parsed_section_metadata = true;
                    continue;
                }
                let fields: Vec<usize> = parse_fields(line)?;
                if fields.len() < 3 {
                    return Err(malformed(line, "truncated element"));
                }
                let nodes_start = fields[2]
                    .checked_add(3)
                    .filter(|&start| start <= fields.len())
                    .ok_or_else(|| malformed(line, "truncated element"))?;
                let tags = &fields[3..nodes_start];
                let physical = tags.first().copied().unwrap_or(0) as u32;
                let elementary = tags.get(1).copied().unwrap_or(0);
                raw_elements.push((fields[1], physical, elementary, fields[nodes_start..].to_vec()));
            }
        }
    }

    for (kind, physical, elementary, ids) in raw_elements {
        let nodes = ids
            .iter()
            .map(|id| {
                node_indexes.get(id).copied().ok_or_else(|| {
                    PlatemeshError::MeshNonConvergence(format!(
                        "element references missing node {id}"
                    ))
                })
            })
            .collect::<Result<Vec<usize>>>()?;
        msh.elements.push(MshElement {
            kind,
            physical,
            elementary,
            nodes,
        });
    }

    Ok(msh)
}

pub fn read_msh(path: &Path) -> Result<MshFile> {
    let contents = std::fs::read_to_string(path)?;
    let msh = parse_msh(&contents)?;
    info!(
        "loaded {} nodes and {} triangles from {}",
        msh.nodes.len(),
        msh.count(TRIANGLE),
        path.display()
    );
    Ok(msh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{
        CurveId, Element, Node, PhysicalGroup, Segment, SurfaceId,
    };

    fn unit_square() -> Mesh {
        let corners = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
        Mesh {
            nodes: corners
                .iter()
                .map(|&(x, y)| Node {
                    vertex: Vertex { x, y },
                })
                .collect(),
            segments: (0..4)
                .map(|i| Segment {
                    nodes: [i, (i + 1) % 4],
                    curve: CurveId(i + 1),
                })
                .collect(),
            elements: vec![
                Element {
                    nodes: [0, 1, 2],
                    surface: SurfaceId(1),
                },
                Element {
                    nodes: [0, 2, 3],
                    surface: SurfaceId(1),
                },
            ],
            groups: vec![
                PhysicalGroup {
                    name: "force_segment".into(),
                    tag: 10,
                    members: GroupMembers::Curves(vec![CurveId(1)]),
                },
                PhysicalGroup {
                    name: "boundary".into(),
                    tag: 20,
                    members: GroupMembers::Curves(vec![CurveId(1), CurveId(2), CurveId(3), CurveId(4)]),
                },
                PhysicalGroup {
                    name: "space".into(),
                    tag: 30,
                    members: GroupMembers::Surfaces(vec![SurfaceId(1)]),
                },
            ],
        }
    }

    #[test]
    fn written_mesh_parses_back() {
        let mesh = unit_square();
        let mut buffer: Vec<u8> = Vec::new();
        write_msh(&mesh, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let parsed = parse_msh(&text).unwrap();

        assert_eq!(parsed.nodes.len(), 4);
        assert_eq!(parsed.nodes[2], Vertex { x: 1.0, y: 1.0 });
        assert_eq!(parsed.physical_names.len(), 3);
        assert_eq!(parsed.physical_name("space").unwrap().dimension, 2);
        assert_eq!(parsed.physical_name("force_segment").unwrap().tag, 10);
        // one segment in force_segment, shared again by boundary
        assert_eq!(parsed.count(LINE), 5);
        assert_eq!(parsed.count(TRIANGLE), 2);
        let first = &parsed.elements[0];
        assert_eq!((first.physical, first.elementary), (10, 1));
        assert_eq!(first.nodes, vec![0, 1]);
    }

    #[test]
    fn gmsh_style_file_with_sparse_ids_parses() {
        let text = "$MeshFormat\n2.2 0 8\n$EndMeshFormat\n\
                    $PhysicalNames\n1\n2 30 \"space\"\n$EndPhysicalNames\n\
                    $Nodes\n3\n5 0 0 0\n7 2 0 0\n9 0 2 0\n$EndNodes\n\
                    $Elements\n2\n1 15 2 0 5 5\n2 2 2 30 1 5 7 9\n$EndElements\n";
        let parsed = parse_msh(text).unwrap();

        assert_eq!(parsed.nodes.len(), 3);
        assert_eq!(parsed.count(TRIANGLE), 1);
        assert_eq!(parsed.elements[1].nodes, vec![0, 1, 2]);
        assert_eq!(parsed.elements[1].physical, 30);
    }

    #[test]
    fn dangling_node_reference_is_rejected() {
        let text = "$Nodes\n1\n1 0 0 0\n$EndNodes\n$Elements\n1\n1 1 2 0 1 1 4\n$EndElements\n";
        assert!(parse_msh(text).is_err());
    }

    #[test]
    fn oversized_tag_count_is_rejected() {
        let text = format!(
            "$Nodes\n1\n1 0 0 0\n$EndNodes\n$Elements\n1\n1 15 {} 1\n$EndElements\n",
            usize::MAX
        );
        assert!(matches!(
            parse_msh(&text),
            Err(PlatemeshError::MeshNonConvergence(_))
        ));
    }
}
