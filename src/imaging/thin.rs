use image::GrayImage;

use super::Skeletonizer;

/// Zhang-Suen two-subiteration thinning. Produces a one-pixel-wide,
/// 8-connected skeleton with the same dimensions as the input mask.
pub struct MorphologicalThinner;

impl Skeletonizer for MorphologicalThinner {
    fn skeletonize(&self, mask: &GrayImage) -> GrayImage {
        let (width, height) = mask.dimensions();
        let w = width as i32;
        let h = height as i32;
        let mut grid: Vec<bool> = mask.pixels().map(|p| p[0] > 0).collect();

        let mut changed = true;
        while changed {
            changed = false;
            for step in 0..2 {
                let mut to_clear = Vec::new();
                for y in 0..h {
                    for x in 0..w {
                        if grid[(y * w + x) as usize] && removable(&grid, w, h, x, y, step) {
                            to_clear.push((y * w + x) as usize);
                        }
                    }
                }
                if !to_clear.is_empty() {
                    changed = true;
                    for index in to_clear {
                        grid[index] = false;
                    }
                }
            }
        }

        let mut skeleton = GrayImage::new(width, height);
        for (index, pixel) in skeleton.pixels_mut().enumerate() {
            pixel[0] = if grid[index] { 255 } else { 0 };
        }
        skeleton
    }
}

fn removable(grid: &[bool], w: i32, h: i32, x: i32, y: i32, step: u8) -> bool {
    let at = |dx: i32, dy: i32| -> u8 {
        let (nx, ny) = (x + dx, y + dy);
        if nx < 0 || ny < 0 || nx >= w || ny >= h {
            0
        } else {
            grid[(ny * w + nx) as usize] as u8
        }
    };

    // p2..p9 clockwise from north.
    let p = [
        at(0, -1),
        at(1, -1),
        at(1, 0),
        at(1, 1),
        at(0, 1),
        at(-1, 1),
        at(-1, 0),
        at(-1, -1),
    ];

    let neighbors: u8 = p.iter().sum();
    if !(2..=6).contains(&neighbors) {
        return false;
    }

    // Transitions 0 -> 1 around the ring.
    let transitions = (0..8).filter(|&i| p[i] == 0 && p[(i + 1) % 8] == 1).count();
    if transitions != 1 {
        return false;
    }

    if step == 0 {
        p[0] * p[2] * p[4] == 0 && p[2] * p[4] * p[6] == 0
    } else {
        p[0] * p[2] * p[6] == 0 && p[0] * p[4] * p[6] == 0
    }
}
