use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use glow::{Context, HasContext as _};
use nalgebra::{Matrix4, Point3};

use crate::material::Material;
use crate::model::Model;
use crate::scene::Scene;
use crate::texture::TextureImage;

/// xyz, normal xyz, uv, rgba
const FLOATS_PER_VERTEX: usize = 12;
const STRIDE: i32 = (FLOATS_PER_VERTEX * std::mem::size_of::<f32>()) as i32;

const VERTEX_SHADER: &str = r#"
    uniform mat4 u_view_proj;
    uniform mat4 u_model;
    layout(location = 0) in vec3 a_pos;
    layout(location = 1) in vec3 a_normal;
    layout(location = 2) in vec2 a_uv;
    layout(location = 3) in vec4 a_col;
    out vec3 v_world;
    out vec3 v_normal;
    out vec2 v_uv;
    out vec4 v_col;
    void main() {
        vec4 world  = u_model * vec4(a_pos, 1.0);
        // uniform scale only, so the model matrix is fine for normals
        v_normal    = mat3(u_model) * a_normal;
        v_world     = world.xyz;
        v_uv        = a_uv;
        v_col       = a_col;
        gl_Position = u_view_proj * world;
    }"#;

const FRAGMENT_SHADER: &str = r#"
    uniform vec3 u_ambient;
    uniform vec3 u_light_dir;
    uniform vec3 u_light_col;
    uniform vec3 u_eye;
    uniform vec3 u_specular;
    uniform float u_shininess;
    uniform sampler2D u_map;
    in  vec3 v_world;
    in  vec3 v_normal;
    in  vec2 v_uv;
    in  vec4 v_col;
    out vec4 o_col;
    void main() {
        // OBJ puts v = 0 at the bottom, images start at the top row
        vec4 base = v_col * texture(u_map, vec2(v_uv.x, 1.0 - v_uv.y));
        vec3 n = normalize(v_normal);
        vec3 to_eye = normalize(u_eye - v_world);
        float lambert = max(dot(n, u_light_dir), 0.0);
        float blinn = 0.0;
        if (lambert > 0.0) {
            vec3 half_dir = normalize(u_light_dir + to_eye);
            blinn = pow(max(dot(n, half_dir), 0.0), max(u_shininess, 1.0));
        }
        vec3 lit = base.rgb * (u_ambient + u_light_col * lambert)
                 + u_specular * u_light_col * blinn;
        o_col = vec4(lit, base.a);
    }"#;

/// Per-frame inputs of [`MeshRenderer::paint`].
#[derive(Debug, Clone, Copy)]
pub struct FrameUniforms {
    pub view_proj: Matrix4<f32>,
    pub model: Matrix4<f32>,
    pub eye: [f32; 3],
    pub ambient: [f32; 3],
    pub light_dir: [f32; 3],
    pub light_col: [f32; 3],
}

impl FrameUniforms {
    pub fn new(scene: &Scene, view_proj: Matrix4<f32>, eye: Point3<f32>) -> Self {
        let scaled = |c: [f32; 3], k: f32| [c[0] * k, c[1] * k, c[2] * k];
        let d = scene.directional.direction;
        Self {
            view_proj,
            model: scene
                .current()
                .map_or_else(Matrix4::identity, |m| m.transform.matrix()),
            eye: [eye.x, eye.y, eye.z],
            ambient: scaled(scene.ambient.color, scene.ambient.intensity),
            light_dir: [d.x, d.y, d.z],
            light_col: scaled(scene.directional.color, scene.directional.intensity),
        }
    }
}

/// A run of the index buffer drawn with one material.
#[derive(Debug, Clone)]
pub struct PartDraw {
    /// Offset into the index buffer, in indices.
    pub first: usize,
    pub count: usize,
    pub specular: [f32; 3],
    pub shininess: f32,
    pub diffuse_map: Option<Arc<TextureImage>>,
}

#[derive(Debug, Default)]
pub struct MeshBuffers {
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
    pub draws: Vec<PartDraw>,
}

/// Flattens every part of `model` into interleaved vertices, one index list
/// and a draw per part.
pub fn mesh_buffers(model: &Model) -> MeshBuffers {
    let mut out = MeshBuffers {
        vertices: Vec::with_capacity(model.vertex_count() * FLOATS_PER_VERTEX),
        indices: Vec::with_capacity(model.triangle_count() * 3),
        draws: Vec::with_capacity(model.parts.len()),
    };
    let plain = Material::default();

    for part in &model.parts {
        let base = (out.vertices.len() / FLOATS_PER_VERTEX) as u32;
        let material = part.material.as_ref().unwrap_or(&plain);
        let [r, g, b] = material.diffuse;
        let a = material.opacity;
        for ((p, n), uv) in part.positions.iter().zip(&part.normals).zip(&part.texcoords) {
            out.vertices
                .extend_from_slice(&[p.x, p.y, p.z, n.x, n.y, n.z, uv.x, uv.y, r, g, b, a]);
        }

        let first = out.indices.len();
        out.indices.extend(part.indices.iter().map(|i| base + i));
        if part.indices.is_empty() {
            continue;
        }
        out.draws.push(PartDraw {
            first,
            count: part.indices.len(),
            specular: material.specular,
            shininess: material.shininess,
            diffuse_map: material.diffuse_map.clone(),
        });
    }
    out
}

struct GpuDraw {
    first: i32,
    count: i32,
    specular: [f32; 3],
    shininess: f32,
    /// Index into `MeshRenderer::textures`.
    texture: Option<usize>,
}

pub struct MeshRenderer {
    program: glow::Program,
    vao: glow::VertexArray,
    vbo: glow::Buffer,
    ebo: glow::Buffer,
    /// Bound for parts without a diffuse map.
    white: glow::Texture,
    textures: Vec<glow::Texture>,
    draws: Vec<GpuDraw>,
    /// Scene revision the buffers were built from.
    uploaded_revision: Option<u64>,
    u_view_proj: Option<glow::UniformLocation>,
    u_model: Option<glow::UniformLocation>,
    u_eye: Option<glow::UniformLocation>,
    u_ambient: Option<glow::UniformLocation>,
    u_light_dir: Option<glow::UniformLocation>,
    u_light_col: Option<glow::UniformLocation>,
    u_specular: Option<glow::UniformLocation>,
    u_shininess: Option<glow::UniformLocation>,
    u_map: Option<glow::UniformLocation>,
}

// The renderer only lives behind a Mutex inside paint callbacks, which run on
// the thread that owns the GL context.
unsafe impl Send for MeshRenderer {}
unsafe impl Sync for MeshRenderer {}

unsafe fn compile(gl: &Context, kind: u32, body: &str) -> anyhow::Result<glow::Shader> {
    unsafe {
        let shader = gl.create_shader(kind).map_err(|e| anyhow!(e))?;
        let header = if cfg!(target_arch = "wasm32") {
            "#version 300 es\nprecision highp float;\n"
        } else {
            "#version 330 core\n"
        };
        gl.shader_source(shader, &format!("{header}{body}"));
        gl.compile_shader(shader);
        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            return Err(anyhow!(log));
        }
        Ok(shader)
    }
}

unsafe fn upload_texture(gl: &Context, image: &TextureImage) -> anyhow::Result<glow::Texture> {
    unsafe {
        let texture = gl.create_texture().map_err(|e| anyhow!(e))?;
        gl.bind_texture(glow::TEXTURE_2D, Some(texture));
        gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
        gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            glow::RGBA8 as i32,
            image.width as i32,
            image.height as i32,
            0,
            glow::RGBA,
            glow::UNSIGNED_BYTE,
            glow::PixelUnpackData::Slice(Some(&image.rgba)),
        );
        gl.generate_mipmap(glow::TEXTURE_2D);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR_MIPMAP_LINEAR as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::REPEAT as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::REPEAT as i32);
        gl.bind_texture(glow::TEXTURE_2D, None);
        Ok(texture)
    }
}

impl MeshRenderer {
    pub unsafe fn new(gl: &Context) -> anyhow::Result<Self> {
        unsafe {
            let vs = compile(gl, glow::VERTEX_SHADER, VERTEX_SHADER).context("vertex shader")?;
            let fs = compile(gl, glow::FRAGMENT_SHADER, FRAGMENT_SHADER).context("fragment shader")?;

            let program = gl.create_program().map_err(|e| anyhow!(e))?;
            gl.attach_shader(program, vs);
            gl.attach_shader(program, fs);
            gl.link_program(program);
            gl.detach_shader(program, vs);
            gl.detach_shader(program, fs);
            gl.delete_shader(vs);
            gl.delete_shader(fs);
            if !gl.get_program_link_status(program) {
                let log = gl.get_program_info_log(program);
                gl.delete_program(program);
                return Err(anyhow!(log).context("linking mesh program"));
            }

            let vao = gl.create_vertex_array().map_err(|e| anyhow!(e))?;
            let vbo = gl.create_buffer().map_err(|e| anyhow!(e))?;
            let ebo = gl.create_buffer().map_err(|e| anyhow!(e))?;
            let white = upload_texture(gl, &TextureImage::solid([255; 4])).context("fallback texture")?;

            gl.bind_vertex_array(Some(vao));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
            gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(ebo));
            gl.enable_vertex_attrib_array(0);
            gl.vertex_attrib_pointer_f32(0, 3, glow::FLOAT, false, STRIDE, 0);
            gl.enable_vertex_attrib_array(1);
            gl.vertex_attrib_pointer_f32(1, 3, glow::FLOAT, false, STRIDE, 12);
            gl.enable_vertex_attrib_array(2);
            gl.vertex_attrib_pointer_f32(2, 2, glow::FLOAT, false, STRIDE, 24);
            gl.enable_vertex_attrib_array(3);
            gl.vertex_attrib_pointer_f32(3, 4, glow::FLOAT, false, STRIDE, 32);
            gl.bind_vertex_array(None);

            Ok(Self {
                u_view_proj: gl.get_uniform_location(program, "u_view_proj"),
                u_model: gl.get_uniform_location(program, "u_model"),
                u_eye: gl.get_uniform_location(program, "u_eye"),
                u_ambient: gl.get_uniform_location(program, "u_ambient"),
                u_light_dir: gl.get_uniform_location(program, "u_light_dir"),
                u_light_col: gl.get_uniform_location(program, "u_light_col"),
                u_specular: gl.get_uniform_location(program, "u_specular"),
                u_shininess: gl.get_uniform_location(program, "u_shininess"),
                u_map: gl.get_uniform_location(program, "u_map"),
                program,
                vao,
                vbo,
                ebo,
                white,
                textures: Vec::new(),
                draws: Vec::new(),
                uploaded_revision: None,
            })
        }
    }

    /// Re-uploads geometry and diffuse maps when the scene's model changed
    /// since the last call. A map that fails to upload is drawn untextured.
    pub unsafe fn sync(&mut self, gl: &Context, scene: &Scene) {
        if self.uploaded_revision == Some(scene.revision()) {
            return;
        }
        let buffers = scene.current().map(mesh_buffers).unwrap_or_default();
        unsafe {
            for texture in self.textures.drain(..) {
                gl.delete_texture(texture);
            }

            gl.bind_vertex_array(Some(self.vao));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.vbo));
            gl.buffer_data_u8_slice(
                glow::ARRAY_BUFFER,
                bytemuck::cast_slice(&buffers.vertices),
                glow::STATIC_DRAW,
            );
            gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(self.ebo));
            gl.buffer_data_u8_slice(
                glow::ELEMENT_ARRAY_BUFFER,
                bytemuck::cast_slice(&buffers.indices),
                glow::STATIC_DRAW,
            );
            gl.bind_vertex_array(None);

            let mut uploaded: Vec<(*const TextureImage, usize)> = Vec::new();
            self.draws.clear();
            for draw in buffers.draws {
                let texture = match &draw.diffuse_map {
                    None => None,
                    Some(image) => match uploaded
                        .iter()
                        .find(|(p, _)| *p == Arc::as_ptr(image))
                        .map(|&(_, slot)| slot)
                    {
                        Some(slot) => Some(slot),
                        None => match upload_texture(gl, image) {
                            Ok(texture) => {
                                self.textures.push(texture);
                                let slot = self.textures.len() - 1;
                                uploaded.push((Arc::as_ptr(image), slot));
                                Some(slot)
                            }
                            Err(e) => {
                                log::warn!("Could not upload texture: {e:#}");
                                None
                            }
                        },
                    },
                };
                self.draws.push(GpuDraw {
                    first: draw.first as i32,
                    count: draw.count as i32,
                    specular: draw.specular,
                    shininess: draw.shininess,
                    texture,
                });
            }
        }
        self.uploaded_revision = Some(scene.revision());
    }

    pub unsafe fn paint(&self, gl: &Context, frame: &FrameUniforms) {
        if self.draws.is_empty() {
            return;
        }
        unsafe {
            gl.enable(glow::DEPTH_TEST);
            gl.depth_func(glow::LEQUAL);
            gl.clear(glow::DEPTH_BUFFER_BIT);
            gl.enable(glow::BLEND);
            gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);

            gl.use_program(Some(self.program));
            gl.uniform_matrix_4_f32_slice(self.u_view_proj.as_ref(), false, frame.view_proj.as_slice());
            gl.uniform_matrix_4_f32_slice(self.u_model.as_ref(), false, frame.model.as_slice());
            gl.uniform_3_f32_slice(self.u_eye.as_ref(), &frame.eye);
            gl.uniform_3_f32_slice(self.u_ambient.as_ref(), &frame.ambient);
            gl.uniform_3_f32_slice(self.u_light_dir.as_ref(), &frame.light_dir);
            gl.uniform_3_f32_slice(self.u_light_col.as_ref(), &frame.light_col);
            gl.uniform_1_i32(self.u_map.as_ref(), 0);
            gl.active_texture(glow::TEXTURE0);

            gl.bind_vertex_array(Some(self.vao));
            for draw in &self.draws {
                let texture = draw.texture.and_then(|i| self.textures.get(i).copied());
                gl.bind_texture(glow::TEXTURE_2D, Some(texture.unwrap_or(self.white)));
                gl.uniform_3_f32_slice(self.u_specular.as_ref(), &draw.specular);
                gl.uniform_1_f32(self.u_shininess.as_ref(), draw.shininess);
                gl.draw_elements(
                    glow::TRIANGLES,
                    draw.count,
                    glow::UNSIGNED_INT,
                    draw.first * std::mem::size_of::<u32>() as i32,
                );
            }
            gl.bind_vertex_array(None);
            gl.bind_texture(glow::TEXTURE_2D, None);

            gl.disable(glow::DEPTH_TEST);
        }
    }

    pub unsafe fn destroy(&self, gl: &Context) {
        unsafe {
            gl.delete_program(self.program);
            gl.delete_vertex_array(self.vao);
            gl.delete_buffer(self.vbo);
            gl.delete_buffer(self.ebo);
            gl.delete_texture(self.white);
            for &texture in &self.textures {
                gl.delete_texture(texture);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{DEFAULT_SHININESS, DEFAULT_SPECULAR, MaterialLibrary};

    #[test]
    fn buffers_offset_indices_per_part() {
        let lib = MaterialLibrary::parse(b"newmtl red\nKd 1 0 0\nKs 0.5 0.5 0.5\nNs 80\nd 0.5\n").unwrap();
        let obj = "o a\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n\
                   o b\nv 0 0 1\nv 1 0 1\nv 0 1 1\nusemtl red\nf 4 5 6\n";
        let model = Model::from_obj("two.obj", obj.as_bytes(), Some(&lib)).unwrap();

        let buffers = mesh_buffers(&model);
        assert_eq!(buffers.vertices.len(), 6 * FLOATS_PER_VERTEX);
        assert_eq!(buffers.indices, [0, 1, 2, 3, 4, 5]);

        // undecorated part falls back to white, the second carries its material
        assert_eq!(&buffers.vertices[8..12], &[1.0, 1.0, 1.0, 1.0]);
        let second = 3 * FLOATS_PER_VERTEX;
        assert_eq!(&buffers.vertices[second + 8..second + 12], &[1.0, 0.0, 0.0, 0.5]);

        assert_eq!(buffers.draws.len(), 2);
        assert_eq!((buffers.draws[0].first, buffers.draws[0].count), (0, 3));
        assert_eq!(buffers.draws[0].specular, DEFAULT_SPECULAR);
        assert_eq!(buffers.draws[0].shininess, DEFAULT_SHININESS);
        assert_eq!((buffers.draws[1].first, buffers.draws[1].count), (3, 3));
        assert_eq!(buffers.draws[1].specular, [0.5, 0.5, 0.5]);
        assert_eq!(buffers.draws[1].shininess, 80.0);
    }

    #[test]
    fn textured_part_carries_uvs_and_map() {
        let mut lib = MaterialLibrary::parse(b"newmtl shade\nmap_Kd shade.png\n").unwrap();
        let map = Arc::new(TextureImage::solid([10, 20, 30, 255]));
        for m in lib.iter_mut() {
            m.diffuse_map = Some(Arc::clone(&map));
        }
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0.25 0.75\nusemtl shade\nf 1/1 2/1 3/1\n";
        let model = Model::from_obj("lamp.obj", obj.as_bytes(), Some(&lib)).unwrap();

        let buffers = mesh_buffers(&model);
        assert_eq!(&buffers.vertices[6..8], &[0.25, 0.75]);
        assert!(Arc::ptr_eq(buffers.draws[0].diffuse_map.as_ref().unwrap(), &map));
    }

    #[test]
    fn uniforms_use_model_transform() {
        let config = crate::config::ViewerConfig::default();
        let mut scene = Scene::new(&config);
        let eye = Point3::new(0.0, 0.0, 5.0);
        assert_eq!(FrameUniforms::new(&scene, Matrix4::identity(), eye).model, Matrix4::identity());

        let mut model = Model::from_obj("t.obj", b"v 0 0 0\nv 2 0 0\nv 0 2 0\nf 1 2 3\n", None).unwrap();
        model.transform.scale = 3.0;
        scene.attach(model);
        let frame = FrameUniforms::new(&scene, Matrix4::identity(), eye);
        assert_eq!(frame.model[(0, 0)], 3.0);
        assert_eq!(frame.ambient, [0.5, 0.5, 0.5]);
        assert_eq!(frame.eye, [0.0, 0.0, 5.0]);
    }
}
