use glam::{Mat4, Vec3};

use crate::input::{KeyCode, KeyEvent, KeyState, PointerPosition};

const PITCH_LIMIT: f32 = 89.0;

/// Keys driving the four movement directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovementKeys {
    pub forward: KeyCode,
    pub back: KeyCode,
    pub left: KeyCode,
    pub right: KeyCode,
}

impl Default for MovementKeys {
    fn default() -> Self {
        Self {
            forward: KeyCode::Character('W'),
            back: KeyCode::Character('S'),
            left: KeyCode::Character('A'),
            right: KeyCode::Character('D'),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSettings {
    pub position: Vec3,
    pub world_up: Vec3,
    /// Degrees; -90 looks down -Z.
    pub yaw: f32,
    pub pitch: f32,
    /// World units per second.
    pub movement_speed: f32,
    /// Degrees per pointer unit per second.
    pub turn_speed: f32,
    pub keys: MovementKeys,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            world_up: Vec3::Y,
            yaw: -90.0,
            pitch: 0.0,
            movement_speed: 5.0,
            turn_speed: 100.0,
            keys: MovementKeys::default(),
        }
    }
}

/// Free-fly camera driven by yaw/pitch and four movement keys.
#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    front: Vec3,
    up: Vec3,
    right: Vec3,
    world_up: Vec3,
    yaw: f32,
    pitch: f32,
    movement_speed: f32,
    turn_speed: f32,
    keys: MovementKeys,
}

impl Camera {
    pub fn new(settings: CameraSettings) -> Self {
        let mut camera = Self {
            position: settings.position,
            front: Vec3::NEG_Z,
            up: Vec3::ZERO,
            right: Vec3::ZERO,
            world_up: settings.world_up,
            yaw: settings.yaw,
            pitch: settings.pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT),
            movement_speed: settings.movement_speed,
            turn_speed: settings.turn_speed,
            keys: settings.keys,
        };
        camera.update();
        camera
    }

    /// Recomputes the `front`, `right` and `up` basis from yaw and pitch.
    ///
    /// [`Camera::new`] and [`Camera::mouse_control`] call this after every
    /// orientation change.
    pub fn update(&mut self) {
        let (yaw, pitch) = (self.yaw.to_radians(), self.pitch.to_radians());
        self.front = Vec3::new(yaw.cos() * pitch.cos(), pitch.sin(), yaw.sin() * pitch.cos())
            .normalize();
        self.right = self.front.cross(self.world_up).normalize();
        self.up = self.right.cross(self.front).normalize();
    }

    /// Moves along `front`/`right` once per pressed event; releases are ignored.
    pub fn key_control(&mut self, events: &[KeyEvent], delta_time: f32) {
        let step = self.movement_speed * delta_time;
        for event in events.iter().filter(|e| e.state == KeyState::Pressed) {
            if event.code == self.keys.forward {
                self.position += self.front * step;
            }
            if event.code == self.keys.back {
                self.position -= self.front * step;
            }
            if event.code == self.keys.left {
                self.position -= self.right * step;
            }
            if event.code == self.keys.right {
                self.position += self.right * step;
            }
        }
    }

    pub fn mouse_control(&mut self, delta: PointerPosition, delta_time: f32) {
        let turn = self.turn_speed * delta_time;
        self.yaw += delta.x * turn;
        self.pitch = (self.pitch + delta.y * turn).clamp(-PITCH_LIMIT, PITCH_LIMIT);
        self.update();
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.front, self.up)
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn front(&self) -> Vec3 {
        self.front
    }

    pub fn right(&self) -> Vec3 {
        self.right
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }
}

/// Perspective projection parameters. `fov` is the vertical field of view in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Projection {
    pub fn new(fov: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            fov,
            aspect,
            near,
            far,
        }
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov.to_radians(), self.aspect, self.near, self.far)
    }
}
