//! Scene-to-device compilation.
//!
//! Turns an imported [`SceneAsset`] into validated context resources in
//! four passes: textures+materials, meshes, the node graph, and finally
//! the `top_object` binding. Materials join their meshes by index, so a
//! material list with duplicate names still compiles correctly. Each
//! resource is validated as soon as its children are, keeping the whole
//! build bottom-up.

use prism_math::Vec4;
use prism_scene::{MeshData, SceneAsset, SceneNode};

use crate::accel::{AccelKind, Accelerator};
use crate::buffer::{Buffer, BufferData};
use crate::context::{Context, Variable};
use crate::error::{RtError, RtResult};
use crate::graph::{GroupChild, TransformChild};
use crate::handle::{GeometryInstanceHandle, GroupHandle, MaterialHandle, TransformHandle};
use crate::program::{ProgramModule, RAY_TYPE_RADIANCE, RAY_TYPE_SHADOW};
use crate::texture::{load_texture, ChannelMode, TextureConfig, TexturePolicy};

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub texture: TextureConfig,
}

/// Handles produced by one compilation, in scene order.
#[derive(Debug, Clone)]
pub struct CompiledScene {
    /// The group bound to `top_object`.
    pub top_object: GroupHandle,
    /// The transform compiled from the scene root node.
    pub root: TransformHandle,
    pub materials: Vec<MaterialHandle>,
    pub instances: Vec<GeometryInstanceHandle>,
}

/// Compile a scene into the context and bind `top_object`.
///
/// Requires the context ray type layout to already be declared (at
/// least the shadow and radiance slots).
pub fn compile_scene(
    ctx: &mut Context,
    scene: &SceneAsset,
    module: &ProgramModule,
    options: &CompileOptions,
) -> RtResult<CompiledScene> {
    if ctx.ray_type_count() <= RAY_TYPE_RADIANCE {
        return Err(RtError::Validation(format!(
            "scene compilation needs {} ray types, context declares {}",
            RAY_TYPE_RADIANCE + 1,
            ctx.ray_type_count()
        )));
    }

    let materials = compile_materials(ctx, scene, module, options)?;
    let instances = compile_meshes(ctx, scene, module, &materials)?;
    let root = compile_node(ctx, &scene.root, &instances)?;

    // Trivial wrapper group so traversal always enters at a group.
    let top = ctx.create_group();
    ctx.group_mut(top).accel = Accelerator::new(AccelKind::NoAccel);
    ctx.group_mut(top).children.push(GroupChild::Transform(root));
    ctx.validate_group(top)?;
    ctx.set_variable("top_object", Variable::Group(top));

    log::info!(
        "compiled scene `{}`: {} materials, {} instances",
        scene.name,
        materials.len(),
        instances.len()
    );

    Ok(CompiledScene {
        top_object: top,
        root,
        materials,
        instances,
    })
}

/// Compile all source materials, in order.
///
/// The three hit programs are shared across materials; the texture
/// slots always end up bound (white fallback for absent or unreadable
/// maps), so this pass cannot leave a material half-initialized.
fn compile_materials(
    ctx: &mut Context,
    scene: &SceneAsset,
    module: &ProgramModule,
    options: &CompileOptions,
) -> RtResult<Vec<MaterialHandle>> {
    let closest_hit = ctx.create_program(module, "closest_hit_radiance")?;
    let any_hit_shadow = ctx.create_program(module, "any_hit_shadow")?;
    let any_hit_radiance = ctx.create_program(module, "any_hit_radiance")?;

    let mut handles = Vec::with_capacity(scene.materials.len());
    for def in &scene.materials {
        let map_kd = load_texture(
            ctx,
            &scene.base_dir,
            def.diffuse_texture.as_deref().unwrap_or(""),
            ChannelMode::Rgba,
            TexturePolicy::FallbackWhite,
            &options.texture,
        )?;
        let map_ks = load_texture(
            ctx,
            &scene.base_dir,
            def.specular_texture.as_deref().unwrap_or(""),
            ChannelMode::Rgba,
            TexturePolicy::FallbackWhite,
            &options.texture,
        )?;
        let map_bump = load_texture(
            ctx,
            &scene.base_dir,
            def.bump_texture.as_deref().unwrap_or(""),
            ChannelMode::Luminance,
            TexturePolicy::FallbackWhite,
            &options.texture,
        )?;

        let handle = ctx.create_material(&def.name);
        let material = ctx.material_mut(handle);
        material.diffuse = def.diffuse.unwrap_or(Vec4::ZERO);
        material.specular = def.specular.unwrap_or(Vec4::ZERO);
        material.shininess = def.shininess.unwrap_or(0.0);
        material.has_source_maps = def.has_textures();
        material.map_kd = Some(map_kd);
        material.map_ks = Some(map_ks);
        material.map_bump = Some(map_bump);
        material.closest_hit[RAY_TYPE_RADIANCE] = Some(closest_hit);
        material.any_hit[RAY_TYPE_SHADOW] = Some(any_hit_shadow);
        material.any_hit[RAY_TYPE_RADIANCE] = Some(any_hit_radiance);

        ctx.validate_material(handle)?;
        handles.push(handle);
    }
    Ok(handles)
}

/// Compile all meshes into geometry instances, index-aligned with the
/// scene's mesh list.
fn compile_meshes(
    ctx: &mut Context,
    scene: &SceneAsset,
    module: &ProgramModule,
    materials: &[MaterialHandle],
) -> RtResult<Vec<GeometryInstanceHandle>> {
    let bounds_program = ctx.create_program(module, "boundingBoxMesh")?;
    let intersection_program = ctx.create_program(module, "intersectMesh")?;

    let mut instances = Vec::with_capacity(scene.meshes.len());
    for mesh in &scene.meshes {
        let material = materials
            .get(mesh.material_index)
            .copied()
            .ok_or_else(|| RtError::MaterialLookup {
                mesh: mesh.name.clone(),
                index: mesh.material_index,
                count: materials.len(),
            })?;

        let geometry = compile_geometry(ctx, mesh, bounds_program, intersection_program)?;

        let instance = ctx.create_geometry_instance();
        ctx.instance_mut(instance).geometry = Some(geometry);
        ctx.instance_mut(instance).material = Some(material);
        ctx.validate_geometry_instance(instance)?;
        instances.push(instance);
    }
    Ok(instances)
}

fn compile_geometry(
    ctx: &mut Context,
    mesh: &MeshData,
    bounds_program: crate::handle::ProgramHandle,
    intersection_program: crate::handle::ProgramHandle,
) -> RtResult<crate::handle::GeometryHandle> {
    let positions: Vec<[f32; 3]> = mesh.positions.iter().map(|p| p.to_array()).collect();
    let normals: Vec<[f32; 3]> = mesh.normals.iter().map(|n| n.to_array()).collect();
    let faces: Vec<[i32; 3]> = mesh
        .faces
        .iter()
        .map(|f| [f[0] as i32, f[1] as i32, f[2] as i32])
        .collect();

    let vertex_buffer = ctx.create_buffer(Buffer::from_data(BufferData::Float3(positions)));
    let normal_buffer = ctx.create_buffer(Buffer::from_data(BufferData::Float3(normals)));
    let index_buffer = ctx.create_buffer(Buffer::from_data(BufferData::Int3(faces)));

    // Optional attributes compile to either a full buffer or a
    // one-element placeholder with the flag cleared.
    let has_texcoord = mesh.has_uvs();
    let texcoord_buffer = match &mesh.uvs {
        Some(uvs) => ctx.create_buffer(Buffer::from_data(BufferData::Float2(uvs.clone()))),
        None => ctx.create_buffer(Buffer::from_data(BufferData::Float2(vec![[0.0; 2]]))),
    };
    let has_tangents = mesh.has_tangents();
    let (tangent_buffer, bitangent_buffer) = match &mesh.tangents {
        Some(basis) => (
            ctx.create_buffer(Buffer::from_data(BufferData::Float3(
                basis.tangents.iter().map(|t| t.to_array()).collect(),
            ))),
            ctx.create_buffer(Buffer::from_data(BufferData::Float3(
                basis.bitangents.iter().map(|b| b.to_array()).collect(),
            ))),
        ),
        None => {
            let placeholder =
                ctx.create_buffer(Buffer::from_data(BufferData::Float3(vec![[0.0; 3]])));
            (placeholder, placeholder)
        }
    };

    for buffer in [
        vertex_buffer,
        normal_buffer,
        index_buffer,
        texcoord_buffer,
        tangent_buffer,
        bitangent_buffer,
    ] {
        ctx.validate_buffer(buffer)?;
    }

    let geometry = ctx.create_geometry();
    let g = ctx.geometry_mut(geometry);
    g.primitive_count = mesh.face_count();
    g.vertex_buffer = Some(vertex_buffer);
    g.normal_buffer = Some(normal_buffer);
    g.index_buffer = Some(index_buffer);
    g.texcoord_buffer = Some(texcoord_buffer);
    g.tangent_buffer = Some(tangent_buffer);
    g.bitangent_buffer = Some(bitangent_buffer);
    g.has_texcoord = has_texcoord;
    g.has_tangents = has_tangents;
    g.bounding_box_program = Some(bounds_program);
    g.intersection_program = Some(intersection_program);
    ctx.validate_geometry(geometry)?;
    Ok(geometry)
}

/// Compile one scene node into a transform, depth-first.
///
/// A leaf node's transform wraps its geometry group directly. An
/// interior node gets a group holding one slot per child subtree plus a
/// trailing slot for the node's own geometry group, kept even when the
/// node carries no meshes so the child layout is position-stable.
fn compile_node(
    ctx: &mut Context,
    node: &SceneNode,
    instances: &[GeometryInstanceHandle],
) -> RtResult<TransformHandle> {
    let child_transforms: Vec<TransformHandle> = node
        .children
        .iter()
        .map(|child| compile_node(ctx, child, instances))
        .collect::<RtResult<_>>()?;

    let geometry_group = ctx.create_geometry_group();
    for &mesh_index in &node.meshes {
        let instance = instances.get(mesh_index).copied().ok_or_else(|| {
            RtError::Validation(format!(
                "node `{}` references mesh {mesh_index}, scene has {}",
                node.name,
                instances.len()
            ))
        })?;
        ctx.geometry_group_mut(geometry_group).children.push(instance);
    }
    ctx.validate_geometry_group(geometry_group)?;

    let child = if node.children.is_empty() {
        TransformChild::GeometryGroup(geometry_group)
    } else {
        let group = ctx.create_group();
        {
            let g = ctx.group_mut(group);
            g.children
                .extend(child_transforms.iter().map(|&t| GroupChild::Transform(t)));
            g.children.push(GroupChild::GeometryGroup(geometry_group));
        }
        ctx.validate_group(group)?;
        TransformChild::Group(group)
    };

    let transform = ctx.create_transform();
    {
        let t = ctx.transform_mut(transform);
        t.set_matrix(node.transform, None);
        t.child = Some(child);
    }
    ctx.validate_transform(transform)?;
    Ok(transform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;
    use prism_math::{Mat4, Vec3};
    use prism_scene::{MaterialDef, MeshData};

    fn two_triangle_mesh(material_index: usize) -> MeshData {
        MeshData {
            name: "quad".to_string(),
            positions: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            normals: vec![Vec3::Z; 4],
            tangents: None,
            uvs: None,
            faces: vec![[0, 1, 2], [0, 2, 3]],
            material_index,
        }
    }

    fn single_node_scene() -> SceneAsset {
        let mut scene = SceneAsset::new("single");
        scene.materials.push(MaterialDef::new("default"));
        scene.meshes.push(two_triangle_mesh(0));
        scene.root.meshes.push(0);
        scene
    }

    fn compile_ctx(scene: &SceneAsset) -> (Context, CompiledScene) {
        let mut ctx = Context::new();
        ctx.set_ray_type_count(2);
        let module = builtin::module();
        let compiled = compile_scene(&mut ctx, scene, &module, &CompileOptions::default()).unwrap();
        (ctx, compiled)
    }

    #[test]
    fn test_single_node_collapses_to_geometry_group() {
        let scene = single_node_scene();
        let (ctx, compiled) = compile_ctx(&scene);

        // top_object wraps exactly the root transform.
        let top = ctx.group(compiled.top_object);
        assert_eq!(top.children, vec![GroupChild::Transform(compiled.root)]);
        assert_eq!(ctx.group_var("top_object"), Some(compiled.top_object));

        // Leaf node: the transform's child is the geometry group itself,
        // with the single instance in it.
        let root = ctx.transform(compiled.root);
        let TransformChild::GeometryGroup(gg) = root.child.unwrap() else {
            panic!("leaf node should wrap its geometry group directly");
        };
        assert_eq!(ctx.geometry_group(gg).children, compiled.instances);

        // Untextured mesh still has bound (placeholder) attribute buffers.
        let instance = ctx.instance(compiled.instances[0]);
        let geometry = ctx.geometry(instance.geometry.unwrap());
        assert!(!geometry.has_texcoord);
        assert!(!geometry.has_tangents);
        assert_eq!(ctx.buffer(geometry.texcoord_buffer.unwrap()).len(), 1);
        assert_eq!(ctx.buffer(geometry.index_buffer.unwrap()).len(), 2);

        // All three material texture slots are bound despite the source
        // material having no maps.
        let material = ctx.material(compiled.materials[0]);
        assert!(!material.has_source_maps);
        assert!(material.map_kd.is_some());
        assert!(material.map_ks.is_some());
        assert!(material.map_bump.is_some());
    }

    #[test]
    fn test_interior_node_gets_trailing_geometry_slot() {
        let mut scene = SceneAsset::new("tree");
        scene.materials.push(MaterialDef::new("default"));
        scene.meshes.push(two_triangle_mesh(0));
        scene.meshes.push(two_triangle_mesh(0));

        let left = prism_scene::SceneNode::new("left").with_meshes(vec![0]);
        let right = prism_scene::SceneNode::new("right")
            .with_meshes(vec![1])
            .with_transform(Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)));
        scene.root.children = vec![left, right];

        let (ctx, compiled) = compile_ctx(&scene);

        // Interior root: 2 child transforms + its own (empty) geometry
        // group in the last slot.
        let root = ctx.transform(compiled.root);
        let TransformChild::Group(group) = root.child.unwrap() else {
            panic!("interior node should get a group");
        };
        let children = &ctx.group(group).children;
        assert_eq!(children.len(), 3);
        assert!(matches!(children[0], GroupChild::Transform(_)));
        assert!(matches!(children[1], GroupChild::Transform(_)));
        let GroupChild::GeometryGroup(own) = children[2] else {
            panic!("last slot should be the node's own geometry group");
        };
        assert!(ctx.geometry_group(own).children.is_empty());
    }

    #[test]
    fn test_material_index_out_of_range() {
        let mut scene = SceneAsset::new("bad");
        scene.materials.push(MaterialDef::new("default"));
        scene.meshes.push(two_triangle_mesh(3));
        scene.root.meshes.push(0);

        let mut ctx = Context::new();
        ctx.set_ray_type_count(2);
        let module = builtin::module();
        let err = compile_scene(&mut ctx, &scene, &module, &CompileOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            RtError::MaterialLookup { index: 3, count: 1, .. }
        ));
    }

    #[test]
    fn test_degenerate_transform_fails_validation() {
        let mut scene = single_node_scene();
        scene.root.transform = Mat4::ZERO;

        let mut ctx = Context::new();
        ctx.set_ray_type_count(2);
        let module = builtin::module();
        let err = compile_scene(&mut ctx, &scene, &module, &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, RtError::Validation(_)));
    }

    #[test]
    fn test_needs_ray_types_declared() {
        let scene = single_node_scene();
        let mut ctx = Context::new();
        let module = builtin::module();
        let err = compile_scene(&mut ctx, &scene, &module, &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, RtError::Validation(_)));
    }

    #[test]
    fn test_fresh_contexts_compile_identically() {
        let mut scene = SceneAsset::new("tree");
        scene.materials.push(MaterialDef::new("a"));
        scene.materials.push(MaterialDef::new("b"));
        scene.meshes.push(two_triangle_mesh(0));
        scene.meshes.push(two_triangle_mesh(1));
        scene.root.children = vec![
            prism_scene::SceneNode::new("left").with_meshes(vec![0]),
            prism_scene::SceneNode::new("right").with_meshes(vec![1]),
        ];

        let (ctx_a, compiled_a) = compile_ctx(&scene);
        let (ctx_b, compiled_b) = compile_ctx(&scene);

        assert_eq!(compiled_a.materials.len(), compiled_b.materials.len());
        assert_eq!(compiled_a.instances.len(), compiled_b.instances.len());
        assert_eq!(ctx_a.texture_count(), ctx_b.texture_count());
        assert_eq!(
            ctx_a.group(compiled_a.top_object).children.len(),
            ctx_b.group(compiled_b.top_object).children.len()
        );
        let shape = |ctx: &Context, c: &CompiledScene| match ctx.transform(c.root).child.unwrap() {
            TransformChild::Group(g) => ctx.group(g).children.len(),
            TransformChild::GeometryGroup(_) => 0,
        };
        assert_eq!(shape(&ctx_a, &compiled_a), shape(&ctx_b, &compiled_b));
        assert_eq!(shape(&ctx_a, &compiled_a), 3);
    }

    #[test]
    fn test_revalidation_is_idempotent() {
        let scene = single_node_scene();
        let (mut ctx, compiled) = compile_ctx(&scene);

        let bounds_before = ctx.group(compiled.top_object).bounds();
        let textures_before = ctx.texture_count();
        let instances_before = ctx.instance_count();

        // Whole-context validation after compile-time validation must
        // succeed and change nothing observable.
        // (The session entry points are not set up here, so stub one in.)
        let module = builtin::module();
        ctx.set_entry_point_count(1);
        let camera = ctx.create_program(&module, "pinhole_camera").unwrap();
        ctx.set_ray_generation_program(0, camera).unwrap();
        ctx.validate().unwrap();
        ctx.validate().unwrap();

        assert_eq!(ctx.texture_count(), textures_before);
        assert_eq!(ctx.instance_count(), instances_before);
        let bounds_after = ctx.group(compiled.top_object).bounds();
        assert_eq!(bounds_before.min(), bounds_after.min());
        assert_eq!(bounds_before.max(), bounds_after.max());
    }
}
