//! Uniform reflection for WGSL stages.
//!
//! The parser only understands module-scope declarations: structs, aliases,
//! integer constants, resource variables and entry points. Function bodies
//! are skipped by brace matching; the GPU backend's own compiler validates
//! them.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::gpu::{ShaderStage, UniformKind};

const MAX_TYPE_DEPTH: usize = 32;
const UNIFORM_ALIGN: u32 = 16;
/// wgpu's default `max_uniform_buffer_binding_size`.
pub const MAX_UNIFORM_BLOCK_SIZE: u32 = 64 << 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReflectError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("unknown or unsupported type '{0}'")]
    UnknownType(String),
    #[error("uniform '{name}' breaks uniform buffer layout rules: {message}")]
    Layout { name: String, message: String },
    #[error("uniform data of {size} bytes exceeds the {limit}-byte uniform buffer limit")]
    TooLarge { size: u64, limit: u32 },
    #[error("'{name}': {message}")]
    Unsupported { name: String, message: String },
    #[error("no @{0} entry point")]
    MissingEntryPoint(ShaderStage),
    #[error("{0}")]
    Link(String),
}

/// Where a single uniform value lives: which uniform buffer, at which byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformSlot {
    pub binding: u32,
    pub offset: u32,
    pub kind: UniformKind,
}

/// One `var<uniform>` declaration and its flattened members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlock {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    /// Buffer size in bytes, rounded up to 16.
    pub size: u32,
    pub slots: Vec<(String, UniformSlot)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Texture2d,
    Sampler,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBinding {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub kind: ResourceKind,
}

/// What a single compiled stage declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReflection {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub uniforms: Vec<UniformBlock>,
    pub resources: Vec<ResourceBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    pub texture: u32,
    pub sampler: u32,
}

/// The merged interface of a linked vertex + fragment pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramReflection {
    pub vertex_entry: String,
    pub fragment_entry: String,
    blocks: Vec<UniformBlock>,
    slots: BTreeMap<String, UniformSlot>,
    texture: Option<TextureBinding>,
}

impl ProgramReflection {
    pub fn slot(&self, name: &str) -> Option<UniformSlot> {
        self.slots.get(name).copied()
    }

    /// Uniform buffers ordered by binding.
    pub fn blocks(&self) -> &[UniformBlock] {
        &self.blocks
    }

    pub fn texture(&self) -> Option<TextureBinding> {
        self.texture
    }

    pub fn slot_names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }
}

/// Parses one stage and computes the layout of everything it binds.
pub fn reflect_stage(stage: ShaderStage, source: &str) -> Result<StageReflection, ReflectError> {
    let tokens = tokenize(source)?;
    let module = Parser::new(tokens).parse_module()?;

    let entry_point = module
        .entry_points
        .iter()
        .find(|(s, _)| *s == stage)
        .map(|(_, name)| name.clone())
        .ok_or(ReflectError::MissingEntryPoint(stage))?;

    let mut uniforms = Vec::new();
    let mut resources = Vec::new();
    for var in &module.vars {
        match var.space.as_deref() {
            Some("uniform") => {
                let (group, binding) = module.group_binding(var)?;
                let ty = module.resolve(&var.ty, 0)?;
                let (_, size) = module.align_and_size(&ty, 0)?;
                let mut slots = Vec::new();
                module.flatten(&var.name, &var.name, &ty, 0, binding, &mut slots, 0)?;
                uniforms.push(UniformBlock {
                    name: var.name.clone(),
                    group,
                    binding,
                    size: round_up(UNIFORM_ALIGN, size),
                    slots,
                });
            }
            Some("storage") => {
                return Err(ReflectError::Unsupported {
                    name: var.name.clone(),
                    message: "storage buffers are not supported".into(),
                })
            }
            Some(_) => {}
            None => {
                let kind = match module.resolve(&var.ty, 0)? {
                    Ty::Texture2d => ResourceKind::Texture2d,
                    Ty::Sampler => ResourceKind::Sampler,
                    _ => {
                        return Err(ReflectError::Unsupported {
                            name: var.name.clone(),
                            message: "module-scope variables need an address space".into(),
                        })
                    }
                };
                let (group, binding) = module.group_binding(var)?;
                resources.push(ResourceBinding {
                    name: var.name.clone(),
                    group,
                    binding,
                    kind,
                });
            }
        }
    }

    Ok(StageReflection {
        stage,
        entry_point,
        uniforms,
        resources,
    })
}

/// Merges both stages into a single program interface.
pub fn link(
    vertex: &StageReflection,
    fragment: &StageReflection,
) -> Result<ProgramReflection, ReflectError> {
    let mut blocks: BTreeMap<u32, UniformBlock> = BTreeMap::new();
    for block in vertex.uniforms.iter().chain(&fragment.uniforms) {
        if block.group != 0 {
            return Err(ReflectError::Link(format!(
                "uniform '{}' must live in @group(0), found @group({})",
                block.name, block.group
            )));
        }
        match blocks.get(&block.binding) {
            Some(existing) if existing.name != block.name => {
                return Err(ReflectError::Link(format!(
                    "binding {} is shared by '{}' and '{}'",
                    block.binding, existing.name, block.name
                )))
            }
            Some(existing) if existing != block => {
                return Err(ReflectError::Link(format!(
                    "uniform '{}' is declared with different layouts",
                    block.name
                )))
            }
            Some(_) => {}
            None => {
                if let Some(other) = blocks.values().find(|b| b.name == block.name) {
                    return Err(ReflectError::Link(format!(
                        "uniform '{}' is declared at bindings {} and {}",
                        block.name, other.binding, block.binding
                    )));
                }
                blocks.insert(block.binding, block.clone());
            }
        }
    }

    let mut resources: BTreeMap<u32, &ResourceBinding> = BTreeMap::new();
    for resource in vertex.resources.iter().chain(&fragment.resources) {
        if resource.group != 1 {
            return Err(ReflectError::Link(format!(
                "'{}' must live in @group(1), found @group({})",
                resource.name, resource.group
            )));
        }
        match resources.get(&resource.binding) {
            Some(existing) if *existing != resource => {
                return Err(ReflectError::Link(format!(
                    "binding {} of @group(1) is shared by '{}' and '{}'",
                    resource.binding, existing.name, resource.name
                )))
            }
            Some(_) => {}
            None => {
                resources.insert(resource.binding, resource);
            }
        }
    }
    let texture = link_texture(resources.values().copied())?;

    let slots = blocks
        .values()
        .flat_map(|block| block.slots.iter().cloned())
        .collect();

    Ok(ProgramReflection {
        vertex_entry: vertex.entry_point.clone(),
        fragment_entry: fragment.entry_point.clone(),
        blocks: blocks.into_values().collect(),
        slots,
        texture,
    })
}

fn link_texture<'a>(
    resources: impl Iterator<Item = &'a ResourceBinding>,
) -> Result<Option<TextureBinding>, ReflectError> {
    let (textures, samplers): (Vec<_>, Vec<_>) =
        resources.partition(|r| r.kind == ResourceKind::Texture2d);
    if textures.len() > 1 || samplers.len() > 1 {
        return Err(ReflectError::Link(
            "only a single texture and sampler pair is supported".into(),
        ));
    }
    match (textures.first(), samplers.first()) {
        (Some(texture), Some(sampler)) => Ok(Some(TextureBinding {
            texture: texture.binding,
            sampler: sampler.binding,
        })),
        (Some(texture), None) => Err(ReflectError::Link(format!(
            "texture '{}' is declared without a sampler",
            texture.name
        ))),
        (None, Some(sampler)) => Err(ReflectError::Link(format!(
            "sampler '{}' is declared without a texture",
            sampler.name
        ))),
        (None, None) => Ok(None),
    }
}

fn within_block_limit(size: u64) -> Result<u32, ReflectError> {
    match u32::try_from(size) {
        Ok(size) if size <= MAX_UNIFORM_BLOCK_SIZE => Ok(size),
        _ => Err(ReflectError::TooLarge {
            size,
            limit: MAX_UNIFORM_BLOCK_SIZE,
        }),
    }
}

fn round_up(align: u32, value: u32) -> u32 {
    value.div_ceil(align) * align
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Number(String),
    Punct(char),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
}

fn tokenize(source: &str) -> Result<Vec<Token>, ReflectError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        if c == '\n' {
            line += 1;
            i += 1;
        } else if c.is_whitespace() {
            i += 1;
        } else if c == '/' && next == Some('/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && next == Some('*') {
            let start = line;
            let mut depth = 0usize;
            loop {
                let Some(&current) = chars.get(i) else {
                    return Err(ReflectError::Syntax {
                        line: start,
                        message: "unterminated block comment".into(),
                    });
                };
                let following = chars.get(i + 1).copied();
                if current == '/' && following == Some('*') {
                    depth += 1;
                    i += 2;
                } else if current == '*' && following == Some('/') {
                    depth -= 1;
                    i += 2;
                    if depth == 0 {
                        break;
                    }
                } else {
                    if current == '\n' {
                        line += 1;
                    }
                    i += 1;
                }
            }
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token {
                tok: Tok::Ident(chars[start..i].iter().collect()),
                line,
            });
        } else if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token {
                tok: Tok::Number(chars[start..i].iter().collect()),
                line,
            });
        } else if "{}()[]<>,;:=@.+-*/%&|^!~?".contains(c) {
            tokens.push(Token {
                tok: Tok::Punct(c),
                line,
            });
            i += 1;
        } else {
            return Err(ReflectError::Syntax {
                line,
                message: format!("unexpected character '{c}'"),
            });
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
struct TypeExpr {
    name: String,
    args: Vec<TypeArg>,
}

#[derive(Debug, Clone, PartialEq)]
enum TypeArg {
    Type(TypeExpr),
    Number(String),
}

#[derive(Debug, Clone)]
struct Attribute {
    name: String,
    args: Vec<Tok>,
}

#[derive(Debug, Clone)]
struct Member {
    name: String,
    ty: TypeExpr,
    explicit_layout: bool,
}

#[derive(Debug, Clone)]
struct GlobalVar {
    name: String,
    space: Option<String>,
    ty: TypeExpr,
    attributes: Vec<Attribute>,
    line: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Ty {
    Leaf(UniformKind),
    Array(Box<Ty>, u32),
    Struct(String),
    Texture2d,
    Sampler,
}

#[derive(Debug, Default)]
struct Module {
    structs: HashMap<String, Vec<Member>>,
    aliases: HashMap<String, TypeExpr>,
    consts: HashMap<String, u32>,
    vars: Vec<GlobalVar>,
    entry_points: Vec<(ShaderStage, String)>,
}

impl Module {
    fn group_binding(&self, var: &GlobalVar) -> Result<(u32, u32), ReflectError> {
        let group = self.attribute_value(var, "group")?;
        let binding = self.attribute_value(var, "binding")?;
        match (group, binding) {
            (Some(group), Some(binding)) => Ok((group, binding)),
            _ => Err(ReflectError::Syntax {
                line: var.line,
                message: format!("'{}' needs both @group and @binding", var.name),
            }),
        }
    }

    fn attribute_value(&self, var: &GlobalVar, name: &str) -> Result<Option<u32>, ReflectError> {
        let Some(attribute) = var.attributes.iter().find(|a| a.name == name) else {
            return Ok(None);
        };
        let value = match attribute.args.as_slice() {
            [Tok::Number(number)] => parse_integer(number),
            [Tok::Ident(ident)] => self.consts.get(ident).copied(),
            _ => None,
        };
        value.map(Some).ok_or_else(|| ReflectError::Syntax {
            line: var.line,
            message: format!("@{name} on '{}' needs a constant integer", var.name),
        })
    }

    fn resolve(&self, expr: &TypeExpr, depth: usize) -> Result<Ty, ReflectError> {
        if depth > MAX_TYPE_DEPTH {
            return Err(ReflectError::UnknownType(expr.name.clone()));
        }
        let unknown = || ReflectError::UnknownType(expr.name.clone());
        let float_arg = || match expr.args.as_slice() {
            [TypeArg::Type(inner)] if inner.name == "f32" && inner.args.is_empty() => Ok(()),
            _ => Err(unknown()),
        };
        let ty = match expr.name.as_str() {
            "f32" => Ty::Leaf(UniformKind::Float),
            "i32" => Ty::Leaf(UniformKind::Int),
            "u32" => Ty::Leaf(UniformKind::UInt),
            "vec2f" => Ty::Leaf(UniformKind::Vec2),
            "vec3f" => Ty::Leaf(UniformKind::Vec3),
            "vec4f" => Ty::Leaf(UniformKind::Vec4),
            "mat3x3f" => Ty::Leaf(UniformKind::Mat3),
            "mat4x4f" => Ty::Leaf(UniformKind::Mat4),
            "vec2" => float_arg().map(|_| Ty::Leaf(UniformKind::Vec2))?,
            "vec3" => float_arg().map(|_| Ty::Leaf(UniformKind::Vec3))?,
            "vec4" => float_arg().map(|_| Ty::Leaf(UniformKind::Vec4))?,
            "mat3x3" => float_arg().map(|_| Ty::Leaf(UniformKind::Mat3))?,
            "mat4x4" => float_arg().map(|_| Ty::Leaf(UniformKind::Mat4))?,
            "texture_2d" => float_arg().map(|_| Ty::Texture2d)?,
            "sampler" => Ty::Sampler,
            "array" => match expr.args.as_slice() {
                [TypeArg::Type(element), count] => {
                    let count = self.array_count(count).ok_or_else(|| {
                        ReflectError::UnknownType(format!("{} (array size)", element.name))
                    })?;
                    Ty::Array(Box::new(self.resolve(element, depth + 1)?), count)
                }
                _ => {
                    return Err(ReflectError::UnknownType(
                        "runtime-sized array".to_string(),
                    ))
                }
            },
            name if self.structs.contains_key(name) => Ty::Struct(name.to_string()),
            name => match self.aliases.get(name) {
                Some(aliased) => self.resolve(aliased, depth + 1)?,
                None => return Err(unknown()),
            },
        };
        Ok(ty)
    }

    fn array_count(&self, arg: &TypeArg) -> Option<u32> {
        match arg {
            TypeArg::Number(number) => parse_integer(number),
            TypeArg::Type(expr) if expr.args.is_empty() => self.consts.get(&expr.name).copied(),
            TypeArg::Type(_) => None,
        }
    }

    fn align_and_size(&self, ty: &Ty, depth: usize) -> Result<(u32, u32), ReflectError> {
        if depth > MAX_TYPE_DEPTH {
            return Err(ReflectError::UnknownType("recursive struct".into()));
        }
        match ty {
            Ty::Leaf(kind) => Ok((leaf_align(*kind), kind.byte_len() as u32)),
            Ty::Array(element, count) => {
                let (align, size) = self.align_and_size(element, depth + 1)?;
                let total = u64::from(round_up(align, size)) * u64::from(*count);
                Ok((align, within_block_limit(total)?))
            }
            Ty::Struct(name) => {
                let members = self.struct_layout(name, depth + 1)?;
                let align = members.iter().map(|m| m.align).max().unwrap_or(4);
                let end = members.last().map(|m| m.offset + m.size).unwrap_or(0);
                Ok((align, round_up(align, end)))
            }
            Ty::Texture2d | Ty::Sampler => Err(ReflectError::UnknownType(
                "handle types cannot be stored in buffers".into(),
            )),
        }
    }

    fn struct_layout(&self, name: &str, depth: usize) -> Result<Vec<MemberLayout>, ReflectError> {
        let members = self
            .structs
            .get(name)
            .ok_or_else(|| ReflectError::UnknownType(name.to_string()))?;
        let mut offset = 0;
        let mut layout = Vec::with_capacity(members.len());
        for member in members {
            let ty = self.resolve(&member.ty, depth)?;
            let (align, size) = self.align_and_size(&ty, depth)?;
            offset = round_up(align, offset);
            layout.push(MemberLayout {
                name: member.name.clone(),
                ty,
                offset,
                align,
                size,
                explicit_layout: member.explicit_layout,
            });
            offset = within_block_limit(u64::from(offset) + u64::from(size))?;
        }
        Ok(layout)
    }

    /// Walks a uniform's type, checking uniform address space rules and
    /// emitting one slot per leaf value.
    #[allow(clippy::too_many_arguments)]
    fn flatten(
        &self,
        root: &str,
        path: &str,
        ty: &Ty,
        base: u32,
        binding: u32,
        out: &mut Vec<(String, UniformSlot)>,
        depth: usize,
    ) -> Result<(), ReflectError> {
        let layout_error = |message: String| ReflectError::Layout {
            name: root.to_string(),
            message,
        };
        match ty {
            Ty::Leaf(kind) => out.push((
                path.to_string(),
                UniformSlot {
                    binding,
                    offset: base,
                    kind: *kind,
                },
            )),
            Ty::Array(element, count) => {
                let (align, size) = self.align_and_size(element, depth + 1)?;
                let stride = round_up(align, size);
                if stride % UNIFORM_ALIGN != 0 {
                    return Err(layout_error(format!(
                        "array '{path}' has a stride of {stride} bytes, which is not a multiple of 16"
                    )));
                }
                for index in 0..*count {
                    self.flatten(
                        root,
                        &format!("{path}[{index}]"),
                        element,
                        base + index * stride,
                        binding,
                        out,
                        depth + 1,
                    )?;
                }
            }
            Ty::Struct(name) => {
                let members = self.struct_layout(name, depth + 1)?;
                for (index, member) in members.iter().enumerate() {
                    if member.explicit_layout {
                        return Err(layout_error(format!(
                            "member '{}' of struct '{name}' uses @align or @size",
                            member.name
                        )));
                    }
                    let aggregate = matches!(member.ty, Ty::Struct(_) | Ty::Array(..));
                    if aggregate && member.offset % UNIFORM_ALIGN != 0 {
                        return Err(layout_error(format!(
                            "member '{}' of struct '{name}' sits at offset {}, which is not 16-byte aligned",
                            member.name, member.offset
                        )));
                    }
                    if let (Ty::Struct(_), Some(next)) = (&member.ty, members.get(index + 1)) {
                        let required = round_up(UNIFORM_ALIGN, member.size);
                        if next.offset - member.offset < required {
                            return Err(layout_error(format!(
                                "member '{}' of struct '{name}' follows struct member '{}' too closely",
                                next.name, member.name
                            )));
                        }
                    }
                    self.flatten(
                        root,
                        &format!("{path}.{}", member.name),
                        &member.ty,
                        base + member.offset,
                        binding,
                        out,
                        depth + 1,
                    )?;
                }
            }
            Ty::Texture2d | Ty::Sampler => {
                return Err(layout_error("handle types cannot be uniforms".into()))
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MemberLayout {
    name: String,
    ty: Ty,
    offset: u32,
    align: u32,
    size: u32,
    explicit_layout: bool,
}

fn leaf_align(kind: UniformKind) -> u32 {
    match kind {
        UniformKind::Float | UniformKind::Int | UniformKind::UInt => 4,
        UniformKind::Vec2 => 8,
        UniformKind::Vec3 | UniformKind::Vec4 | UniformKind::Mat3 | UniformKind::Mat4 => 16,
    }
}

fn parse_integer(literal: &str) -> Option<u32> {
    literal
        .strip_suffix(&['u', 'i'][..])
        .unwrap_or(literal)
        .parse()
        .ok()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse_module(mut self) -> Result<Module, ReflectError> {
        let mut module = Module::default();
        while self.peek().is_some() {
            if self.eat_punct(';') {
                continue;
            }
            let attributes = self.parse_attributes()?;
            let line = self.line();
            let keyword = self.expect_ident()?;
            match keyword.as_str() {
                "struct" => {
                    let name = self.expect_ident()?;
                    let members = self.parse_struct_body()?;
                    module.structs.insert(name, members);
                }
                "var" => {
                    let var = self.parse_var(attributes, line)?;
                    module.vars.push(var);
                }
                "fn" => {
                    let name = self.expect_ident()?;
                    self.skip_function()?;
                    let stage = attributes.iter().find_map(|a| match a.name.as_str() {
                        "vertex" => Some(ShaderStage::Vertex),
                        "fragment" => Some(ShaderStage::Fragment),
                        _ => None,
                    });
                    if let Some(stage) = stage {
                        module.entry_points.push((stage, name));
                    }
                }
                "const" | "override" => {
                    let name = self.expect_ident()?;
                    if self.eat_punct(':') {
                        self.parse_type()?;
                    }
                    let value = if self.eat_punct('=') {
                        self.collect_until_semicolon()?
                    } else {
                        self.expect_punct(';')?;
                        Vec::new()
                    };
                    if let [Tok::Number(number)] = value.as_slice() {
                        if let Some(value) = parse_integer(number) {
                            module.consts.insert(name, value);
                        }
                    }
                }
                "alias" => {
                    let name = self.expect_ident()?;
                    self.expect_punct('=')?;
                    let ty = self.parse_type()?;
                    self.expect_punct(';')?;
                    module.aliases.insert(name, ty);
                }
                "enable" | "requires" | "diagnostic" | "const_assert" => {
                    self.collect_until_semicolon()?;
                }
                other => {
                    return Err(ReflectError::Syntax {
                        line,
                        message: format!("unexpected '{other}' at module scope"),
                    })
                }
            }
        }
        Ok(module)
    }

    fn parse_attributes(&mut self) -> Result<Vec<Attribute>, ReflectError> {
        let mut attributes = Vec::new();
        while self.eat_punct('@') {
            let name = self.expect_ident()?;
            let mut args = Vec::new();
            if self.eat_punct('(') {
                let mut depth = 1;
                loop {
                    let tok = self.next()?;
                    match tok {
                        Tok::Punct('(') => depth += 1,
                        Tok::Punct(')') => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        Tok::Punct(',') if depth == 1 => continue,
                        _ => {}
                    }
                    args.push(tok);
                }
            }
            attributes.push(Attribute { name, args });
        }
        Ok(attributes)
    }

    fn parse_struct_body(&mut self) -> Result<Vec<Member>, ReflectError> {
        self.expect_punct('{')?;
        let mut members = Vec::new();
        loop {
            if self.eat_punct('}') {
                break;
            }
            let attributes = self.parse_attributes()?;
            let name = self.expect_ident()?;
            self.expect_punct(':')?;
            let ty = self.parse_type()?;
            members.push(Member {
                name,
                ty,
                explicit_layout: attributes
                    .iter()
                    .any(|a| a.name == "align" || a.name == "size"),
            });
            if !self.eat_punct(',') && !self.eat_punct(';') {
                self.expect_punct('}')?;
                break;
            }
        }
        if members.is_empty() {
            return Err(self.error("structs need at least one member"));
        }
        Ok(members)
    }

    fn parse_var(&mut self, attributes: Vec<Attribute>, line: usize) -> Result<GlobalVar, ReflectError> {
        let mut space = None;
        if self.eat_punct('<') {
            space = Some(self.expect_ident()?);
            if self.eat_punct(',') {
                self.expect_ident()?;
            }
            self.expect_punct('>')?;
        }
        let name = self.expect_ident()?;
        self.expect_punct(':')?;
        let ty = self.parse_type()?;
        if self.eat_punct('=') {
            self.collect_until_semicolon()?;
        } else {
            self.expect_punct(';')?;
        }
        Ok(GlobalVar {
            name,
            space,
            ty,
            attributes,
            line,
        })
    }

    fn parse_type(&mut self) -> Result<TypeExpr, ReflectError> {
        let name = self.expect_ident()?;
        let mut args = Vec::new();
        if self.eat_punct('<') {
            loop {
                if self.eat_punct('>') {
                    break;
                }
                let arg = match self.peek() {
                    Some(Tok::Number(number)) => {
                        let number = number.clone();
                        self.pos += 1;
                        TypeArg::Number(number)
                    }
                    _ => TypeArg::Type(self.parse_type()?),
                };
                args.push(arg);
                if !self.eat_punct(',') {
                    self.expect_punct('>')?;
                    break;
                }
            }
        }
        Ok(TypeExpr { name, args })
    }

    /// Skips a function signature and its body.
    fn skip_function(&mut self) -> Result<(), ReflectError> {
        loop {
            if self.next()? == Tok::Punct('{') {
                break;
            }
        }
        let mut depth = 1;
        while depth > 0 {
            match self.next()? {
                Tok::Punct('{') => depth += 1,
                Tok::Punct('}') => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    fn collect_until_semicolon(&mut self) -> Result<Vec<Tok>, ReflectError> {
        let mut collected = Vec::new();
        loop {
            match self.next()? {
                Tok::Punct(';') => return Ok(collected),
                tok => collected.push(tok),
            }
        }
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn error(&self, message: impl Into<String>) -> ReflectError {
        ReflectError::Syntax {
            line: self.line(),
            message: message.into(),
        }
    }

    fn next(&mut self) -> Result<Tok, ReflectError> {
        let token = self
            .tokens
            .get(self.pos)
            .map(|t| t.tok.clone())
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += 1;
        Ok(token)
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.peek() == Some(&Tok::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<(), ReflectError> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}', found {}", self.describe_current())))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ReflectError> {
        match self.peek() {
            Some(Tok::Ident(ident)) => {
                let ident = ident.clone();
                self.pos += 1;
                Ok(ident)
            }
            _ => Err(self.error(format!(
                "expected an identifier, found {}",
                self.describe_current()
            ))),
        }
    }

    fn describe_current(&self) -> String {
        match self.peek() {
            Some(Tok::Ident(ident)) => format!("'{ident}'"),
            Some(Tok::Number(number)) => format!("'{number}'"),
            Some(Tok::Punct(c)) => format!("'{c}'"),
            None => "end of input".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIGHTS: &str = r#"
        const MAX_POINT_LIGHTS: i32 = 3;

        struct BaseLight {
            color: vec3<f32>,
            intensity: f32,
            diffuseIntensity: f32,
        }

        struct DirectionalLight {
            base: BaseLight,
            direction: vec3<f32>,
        }

        struct PointLight {
            base: BaseLight,
            position: vec3f,
            constant: f32,
            linear: f32,
            exponent: f32,
        }

        struct Material { specularIntensity: f32, shininess: f32 }

        @group(0) @binding(4) var<uniform> directionalLight: DirectionalLight;
        @group(0) @binding(5) var<uniform> pointLights: array<PointLight, MAX_POINT_LIGHTS>;
        @group(0) @binding(6) var<uniform> pointLightCount: i32;
        @group(0) @binding(7) var<uniform> material: Material;

        @fragment
        fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
            /* nested /* comment */ with braces { */
            if (pointLightCount > 0) { return vec4<f32>(1.0); }
            return vec4<f32>(uv, 0.0, 1.0);
        }
    "#;

    fn slot(reflection: &StageReflection, name: &str) -> UniformSlot {
        reflection
            .uniforms
            .iter()
            .flat_map(|b| b.slots.iter())
            .find(|(n, _)| n == name)
            .map(|(_, s)| *s)
            .unwrap_or_else(|| panic!("missing slot {name}"))
    }

    #[test]
    fn nested_light_structs_follow_uniform_layout() {
        let reflection = reflect_stage(ShaderStage::Fragment, LIGHTS).unwrap();
        assert_eq!(reflection.entry_point, "fs_main");

        let direction = slot(&reflection, "directionalLight.direction");
        assert_eq!((direction.binding, direction.offset), (4, 32));
        assert_eq!(slot(&reflection, "directionalLight.base.intensity").offset, 12);
        assert_eq!(
            slot(&reflection, "directionalLight.base.diffuseIntensity").offset,
            16
        );

        let second = slot(&reflection, "pointLights[1].position");
        assert_eq!((second.binding, second.offset), (5, 64 + 32));
        assert_eq!(slot(&reflection, "pointLights[2].exponent").offset, 128 + 52);
        assert_eq!(slot(&reflection, "material.shininess").offset, 4);

        let sizes: Vec<(String, u32)> = reflection
            .uniforms
            .iter()
            .map(|b| (b.name.clone(), b.size))
            .collect();
        assert_eq!(
            sizes,
            vec![
                ("directionalLight".to_string(), 48),
                ("pointLights".to_string(), 192),
                ("pointLightCount".to_string(), 16),
                ("material".to_string(), 16),
            ]
        );
    }

    #[test]
    fn scalar_arrays_are_rejected_in_uniforms() {
        let source = "@group(0) @binding(0) var<uniform> weights: array<f32, 4>;\n@vertex fn vs() {}";
        let err = reflect_stage(ShaderStage::Vertex, source).unwrap_err();
        assert!(matches!(err, ReflectError::Layout { ref name, .. } if name == "weights"));
    }

    #[test]
    fn struct_members_after_small_structs_are_rejected() {
        let source = r#"
            struct Inner { a: f32, b: f32 }
            struct Outer { inner: Inner, tail: f32 }
            @group(0) @binding(0) var<uniform> outer: Outer;
            @vertex fn vs() {}
        "#;
        let err = reflect_stage(ShaderStage::Vertex, source).unwrap_err();
        assert!(matches!(err, ReflectError::Layout { .. }));
    }

    #[test]
    fn oversized_uniform_arrays_are_rejected() {
        let source = "@group(0) @binding(0) var<uniform> big: array<vec4<f32>, 300000000>;\n@vertex fn vs() {}";
        assert!(matches!(
            reflect_stage(ShaderStage::Vertex, source),
            Err(ReflectError::TooLarge { limit: MAX_UNIFORM_BLOCK_SIZE, .. })
        ));

        let just_over = "@group(0) @binding(0) var<uniform> big: array<vec4<f32>, 4097>;\n@vertex fn vs() {}";
        assert!(matches!(
            reflect_stage(ShaderStage::Vertex, just_over),
            Err(ReflectError::TooLarge { size: 65552, .. })
        ));

        let at_limit = "@group(0) @binding(0) var<uniform> big: array<vec4<f32>, 4096>;\n@vertex fn vs() {}";
        let reflection = reflect_stage(ShaderStage::Vertex, at_limit).unwrap();
        assert_eq!(reflection.uniforms[0].size, MAX_UNIFORM_BLOCK_SIZE);
    }

    #[test]
    fn oversized_structs_are_rejected() {
        let source = r#"
            struct Chunk { data: array<mat4x4<f32>, 1024> }
            struct Pair { a: Chunk, b: Chunk }
            @group(0) @binding(0) var<uniform> pair: Pair;
            @vertex fn vs() {}
        "#;
        assert!(matches!(
            reflect_stage(ShaderStage::Vertex, source),
            Err(ReflectError::TooLarge { .. })
        ));
    }

    #[test]
    fn missing_entry_point_is_reported() {
        let err = reflect_stage(ShaderStage::Vertex, LIGHTS).unwrap_err();
        assert_eq!(err, ReflectError::MissingEntryPoint(ShaderStage::Vertex));
    }

    #[test]
    fn syntax_errors_carry_line_numbers() {
        let source = "struct Broken {\n  color vec3<f32>,\n}\n@vertex fn vs() {}";
        match reflect_stage(ShaderStage::Vertex, source) {
            Err(ReflectError::Syntax { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected a syntax error, got {other:?}"),
        }
        assert!(matches!(
            reflect_stage(ShaderStage::Vertex, "@vertex fn vs() {"),
            Err(ReflectError::Syntax { .. })
        ));
    }

    #[test]
    fn link_merges_matching_declarations() {
        let vertex = reflect_stage(
            ShaderStage::Vertex,
            "@group(0) @binding(0) var<uniform> model: mat4x4<f32>;\n@vertex fn vs() {}",
        )
        .unwrap();
        let fragment = reflect_stage(
            ShaderStage::Fragment,
            r#"
            @group(0) @binding(0) var<uniform> model: mat4x4<f32>;
            @group(1) @binding(0) var albedo: texture_2d<f32>;
            @group(1) @binding(1) var albedoSampler: sampler;
            @fragment fn fs() {}
            "#,
        )
        .unwrap();
        let program = link(&vertex, &fragment).unwrap();
        assert_eq!(program.blocks().len(), 1);
        assert_eq!(program.slot("model").map(|s| s.kind), Some(UniformKind::Mat4));
        assert_eq!(
            program.texture(),
            Some(TextureBinding {
                texture: 0,
                sampler: 1
            })
        );
    }

    #[test]
    fn link_rejects_conflicting_layouts() {
        let vertex = reflect_stage(
            ShaderStage::Vertex,
            "@group(0) @binding(3) var<uniform> eyePos: vec3<f32>;\n@vertex fn vs() {}",
        )
        .unwrap();
        let fragment = reflect_stage(
            ShaderStage::Fragment,
            "@group(0) @binding(3) var<uniform> eyePos: vec4<f32>;\n@fragment fn fs() {}",
        )
        .unwrap();
        assert!(matches!(link(&vertex, &fragment), Err(ReflectError::Link(_))));
    }

    #[test]
    fn link_rejects_texture_without_sampler() {
        let vertex = reflect_stage(ShaderStage::Vertex, "@vertex fn vs() {}").unwrap();
        let fragment = reflect_stage(
            ShaderStage::Fragment,
            "@group(1) @binding(0) var albedo: texture_2d<f32>;\n@fragment fn fs() {}",
        )
        .unwrap();
        let err = link(&vertex, &fragment).unwrap_err();
        assert!(err.to_string().contains("without a sampler"));
    }

    #[test]
    fn link_rejects_uniforms_outside_group_zero() {
        let vertex = reflect_stage(
            ShaderStage::Vertex,
            "@group(2) @binding(0) var<uniform> view: mat4x4f;\n@vertex fn vs() {}",
        )
        .unwrap();
        let fragment = reflect_stage(ShaderStage::Fragment, "@fragment fn fs() {}").unwrap();
        assert!(link(&vertex, &fragment).is_err());
    }
}
