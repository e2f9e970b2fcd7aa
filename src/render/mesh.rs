use log::debug;

use crate::error::SetupError;
use crate::gpu::{BufferHandle, BufferKind, GraphicsContext, VertexArrayHandle, VertexLayout};

/// Indexed triangle geometry uploaded to the GPU.
pub struct Mesh<'a> {
    ctx: &'a dyn GraphicsContext,
    layout: VertexLayout,
    vertex_array: Option<VertexArrayHandle>,
    vertex_buffer: Option<BufferHandle>,
    index_buffer: Option<BufferHandle>,
    index_count: u32,
}

impl<'a> Mesh<'a> {
    /// Uploads interleaved `vertices` and triangle `indices` described by `layout`.
    pub fn new(
        ctx: &'a dyn GraphicsContext,
        vertices: &[f32],
        indices: &[u32],
        layout: VertexLayout,
    ) -> Result<Self, SetupError> {
        let vertex_count = validate(vertices, indices, &layout)?;

        let vertex_buffer = ctx.create_buffer(BufferKind::Vertex, bytemuck::cast_slice(vertices))?;
        let index_buffer = match ctx.create_buffer(BufferKind::Index, bytemuck::cast_slice(indices))
        {
            Ok(buffer) => buffer,
            Err(err) => {
                ctx.delete_buffer(vertex_buffer);
                return Err(err);
            }
        };
        let index_count = indices.len() as u32;
        let vertex_array =
            match ctx.create_vertex_array(&layout, vertex_buffer, index_buffer, index_count) {
                Ok(vertex_array) => vertex_array,
                Err(err) => {
                    ctx.delete_buffer(index_buffer);
                    ctx.delete_buffer(vertex_buffer);
                    return Err(err);
                }
            };
        debug!("mesh uploaded: {vertex_count} vertices, {index_count} indices");

        Ok(Self {
            ctx,
            layout,
            vertex_array: Some(vertex_array),
            vertex_buffer: Some(vertex_buffer),
            index_buffer: Some(index_buffer),
            index_count,
        })
    }

    /// Draws every index as a triangle list. A cleared mesh draws nothing.
    pub fn render(&self) {
        let Some(vertex_array) = self.vertex_array else {
            return;
        };
        self.ctx.bind_vertex_array(Some(vertex_array));
        self.ctx.draw_indexed(self.index_count);
        self.ctx.bind_vertex_array(None);
    }

    /// Releases the GPU objects. Safe to call more than once.
    pub fn clear(&mut self) {
        if let Some(vertex_array) = self.vertex_array.take() {
            self.ctx.delete_vertex_array(vertex_array);
        }
        if let Some(index_buffer) = self.index_buffer.take() {
            self.ctx.delete_buffer(index_buffer);
        }
        if let Some(vertex_buffer) = self.vertex_buffer.take() {
            self.ctx.delete_buffer(vertex_buffer);
        }
        self.index_count = 0;
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    pub fn is_cleared(&self) -> bool {
        self.vertex_array.is_none()
    }
}

impl Drop for Mesh<'_> {
    fn drop(&mut self) {
        self.clear();
    }
}

fn validate(vertices: &[f32], indices: &[u32], layout: &VertexLayout) -> Result<usize, SetupError> {
    let floats = layout.floats_per_vertex();
    if floats == 0 {
        return Err(SetupError::Geometry("vertex layout is empty".into()));
    }
    if vertices.is_empty() || vertices.len() % floats != 0 {
        return Err(SetupError::Geometry(format!(
            "{} floats do not form whole vertices of {floats} floats",
            vertices.len()
        )));
    }
    if indices.is_empty() || indices.len() % 3 != 0 {
        return Err(SetupError::Geometry(format!(
            "{} indices do not form whole triangles",
            indices.len()
        )));
    }
    let vertex_count = vertices.len() / floats;
    if let Some(index) = indices.iter().find(|&&i| i as usize >= vertex_count) {
        return Err(SetupError::Geometry(format!(
            "index {index} is out of range for {vertex_count} vertices"
        )));
    }
    Ok(vertex_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::{Command, HeadlessContext, LiveObjects};

    const TRIANGLE: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

    #[test]
    fn clearing_twice_releases_each_object_once() {
        let ctx = HeadlessContext::new();
        let mut mesh = Mesh::new(&ctx, &TRIANGLE, &[0, 1, 2], VertexLayout::position_only())
            .unwrap();
        mesh.clear();
        mesh.clear();
        drop(mesh);

        let deletes = ctx
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::DeleteBuffer(_) | Command::DeleteVertexArray(_)))
            .count();
        assert_eq!(deletes, 3);
        assert_eq!(ctx.live_objects(), LiveObjects::default());
    }

    #[test]
    fn render_draws_the_full_index_count() {
        let ctx = HeadlessContext::new();
        let mesh = Mesh::new(&ctx, &TRIANGLE, &[0, 1, 2], VertexLayout::position_only())
            .unwrap();
        ctx.reset_log();
        mesh.render();
        let commands = ctx.commands();
        assert!(matches!(commands[0], Command::BindVertexArray(Some(_))));
        assert_eq!(commands[1], Command::DrawIndexed { index_count: 3 });
        assert_eq!(commands[2], Command::BindVertexArray(None));
    }

    #[test]
    fn cleared_meshes_do_not_draw() {
        let ctx = HeadlessContext::new();
        let mut mesh = Mesh::new(&ctx, &TRIANGLE, &[0, 1, 2], VertexLayout::position_only())
            .unwrap();
        mesh.clear();
        ctx.reset_log();
        mesh.render();
        assert!(ctx.commands().is_empty());
        assert_eq!(mesh.index_count(), 0);
    }

    #[test]
    fn rejects_bad_geometry_without_leaking() {
        let ctx = HeadlessContext::new();
        let layout = VertexLayout::position_only;
        assert!(Mesh::new(&ctx, &TRIANGLE[..8], &[0, 1, 2], layout()).is_err());
        assert!(Mesh::new(&ctx, &TRIANGLE, &[0, 1], layout()).is_err());
        assert!(Mesh::new(&ctx, &TRIANGLE, &[0, 1, 3], layout()).is_err());
        assert!(Mesh::new(&ctx, &TRIANGLE, &[0, 1, 2], VertexLayout::lit()).is_err());
        assert_eq!(ctx.live_objects(), LiveObjects::default());
    }
}
