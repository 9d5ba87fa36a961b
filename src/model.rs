//! The loaded model: sub-meshes parsed from OBJ text plus one transform.

use std::io::{BufReader, Read};

use nalgebra::{Point3, Vector2, Vector3};

use crate::material::{Material, MaterialLibrary};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    pub fn new(a: Point3<f32>, b: Point3<f32>) -> Self {
        Self {
            min: a.inf(&b),
            max: a.sup(&b),
        }
    }

    /// `None` for an empty iterator.
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point3<f32>>,
    {
        let mut points = points.into_iter();
        let first = *points.next()?;
        Some(points.fold(Self::new(first, first), |acc, p| Self {
            min: acc.min.inf(p),
            max: acc.max.sup(p),
        }))
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    pub fn center(&self) -> Point3<f32> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn size(&self) -> Vector3<f32> {
        self.max - self.min
    }

    pub fn max_extent(&self) -> f32 {
        self.size().max()
    }
}

/// Uniform scale then translation: `world = local * scale + translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vector3<f32>,
    pub scale: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vector3::zeros(),
            scale: 1.0,
        }
    }
}

impl Transform {
    pub fn apply(&self, p: &Point3<f32>) -> Point3<f32> {
        Point3::from(p.coords * self.scale + self.translation)
    }

    pub fn matrix(&self) -> nalgebra::Matrix4<f32> {
        nalgebra::Matrix4::new_translation(&self.translation)
            * nalgebra::Matrix4::new_scaling(self.scale)
    }
}

#[derive(Debug, Clone)]
pub struct MeshPart {
    pub name: String,
    pub positions: Vec<Point3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    /// One per position; all zero when the file has no `vt` lines.
    pub texcoords: Vec<Vector2<f32>>,
    /// Triangle list into `positions`.
    pub indices: Vec<u32>,
    pub material: Option<Material>,
}

#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub parts: Vec<MeshPart>,
    pub transform: Transform,
}

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("mesh is not valid OBJ: {0}")]
    Parse(#[from] tobj::LoadError),
    #[error("face index {index} out of range ({count} vertices)")]
    IndexOutOfRange { index: u32, count: usize },
}

impl Model {
    /// Parses OBJ text. With `materials`, each `usemtl` is resolved against
    /// that library whether or not the file names it in an `mtllib` line.
    pub fn from_obj(
        name: impl Into<String>,
        bytes: &[u8],
        materials: Option<&MaterialLibrary>,
    ) -> Result<Self, MeshError> {
        let options = tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ignore_points: true,
            ignore_lines: true,
            ..Default::default()
        };

        let header: &[u8] = if materials.is_some() { b"mtllib companion\n" } else { b"" };
        let mut reader = BufReader::new(header.chain(bytes));
        let (models, resolved) = tobj::load_obj_buf(&mut reader, &options, |_| match materials {
            Some(lib) => Ok((
                lib.iter()
                    .map(|m| tobj::Material {
                        name: m.name.clone(),
                        ..Default::default()
                    })
                    .collect(),
                lib.iter()
                    .enumerate()
                    .map(|(i, m)| (m.name.clone(), i))
                    .collect(),
            )),
            None => Ok((Vec::new(), Default::default())),
        })?;
        let resolved = resolved.unwrap_or_default();

        let mut parts = Vec::with_capacity(models.len());
        for m in models {
            let mesh = m.mesh;
            let positions: Vec<Point3<f32>> = mesh
                .positions
                .chunks_exact(3)
                .map(|c| Point3::new(c[0], c[1], c[2]))
                .collect();
            if let Some(&index) = mesh.indices.iter().find(|&&i| i as usize >= positions.len()) {
                return Err(MeshError::IndexOutOfRange {
                    index,
                    count: positions.len(),
                });
            }

            let normals = if mesh.normals.len() == mesh.positions.len() && !mesh.normals.is_empty() {
                mesh.normals
                    .chunks_exact(3)
                    .map(|c| Vector3::new(c[0], c[1], c[2]))
                    .collect()
            } else {
                vertex_normals(&positions, &mesh.indices)
            };

            let texcoords = if mesh.texcoords.len() == positions.len() * 2 {
                mesh.texcoords
                    .chunks_exact(2)
                    .map(|c| Vector2::new(c[0], c[1]))
                    .collect()
            } else {
                vec![Vector2::zeros(); positions.len()]
            };

            let material = mesh
                .material_id
                .and_then(|id| resolved.get(id))
                .and_then(|m| materials?.get(&m.name))
                .cloned();

            parts.push(MeshPart {
                name: m.name,
                positions,
                normals,
                texcoords,
                indices: mesh.indices,
                material,
            });
        }

        Ok(Self {
            name: name.into(),
            parts,
            transform: Transform::default(),
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.parts.iter().map(|p| p.positions.len()).sum()
    }

    pub fn triangle_count(&self) -> usize {
        self.parts.iter().map(|p| p.indices.len() / 3).sum()
    }

    pub fn decorated_parts(&self) -> usize {
        self.parts.iter().filter(|p| p.material.is_some()).count()
    }

    /// Bounds of the untransformed geometry.
    pub fn local_bounds(&self) -> Option<Aabb> {
        Aabb::from_points(self.parts.iter().flat_map(|p| p.positions.iter()))
    }

    /// Bounds after applying `transform`.
    pub fn world_bounds(&self) -> Option<Aabb> {
        let local = self.local_bounds()?;
        Some(Aabb::new(
            self.transform.apply(&local.min),
            self.transform.apply(&local.max),
        ))
    }
}

/// Area-weighted vertex normals for meshes that ship without any.
fn vertex_normals(positions: &[Point3<f32>], indices: &[u32]) -> Vec<Vector3<f32>> {
    let mut normals = vec![Vector3::zeros(); positions.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let n = (positions[b] - positions[a]).cross(&(positions[c] - positions[a]));
        normals[a] += n;
        normals[b] += n;
        normals[c] += n;
    }
    for n in &mut normals {
        *n = n.try_normalize(f32::EPSILON).unwrap_or_else(Vector3::y);
    }
    normals
}
