// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Dirty-rectangle comparison between two frames.
//!
//! Chops the image into 64x64 tiles and reports the tiles containing at
//! least one changed pixel, so an incremental update only carries the
//! regions that moved. Tiles are aligned to multiples of 64 on both axes
//! and clipped at the right/bottom edges. Within a 64-row strip, at most
//! one tile per column is reported: a second distinct change lower in the
//! same column of the same strip rides along in the tile already emitted.

use crate::error::{Result, RfbError};
use crate::framebuffer::{DirtyRegion, Framebuffer};

/// Tile edge length in pixels.
const SECTION_SIZE: usize = 64;

/// Compares two frames and returns the changed tiles in strip-major order
/// (top-to-bottom, encounter order within a strip).
///
/// A `None` previous frame means nothing has been sent yet, so the whole
/// image is returned as one rectangle. A `None` next frame is the host's
/// "no change" signal and yields the empty list. Comparing two `None`
/// frames, or frames of different bounds, is a host contract violation.
pub(crate) fn changed_tiles(
    prev: Option<&Framebuffer>,
    next: Option<&Framebuffer>,
) -> Result<Vec<DirtyRegion>> {
    let (prev, next) = match (prev, next) {
        (None, None) => return Err(RfbError::NoFramesToCompare),
        (None, Some(next)) => return Ok(vec![next.bounds()]),
        (Some(_), None) => return Ok(Vec::new()),
        (Some(prev), Some(next)) => (prev, next),
    };

    if prev.width() != next.width() || prev.height() != next.height() {
        return Err(RfbError::BoundsMismatch {
            prev_width: prev.width(),
            prev_height: prev.height(),
            next_width: next.width(),
            next_height: next.height(),
        });
    }

    let width = usize::from(next.width());
    let height = usize::from(next.height());
    let stride = width * 4;
    let columns = width.div_ceil(SECTION_SIZE);

    let mut tiles = Vec::new();
    for section_top in (0..height).step_by(SECTION_SIZE) {
        let section_bottom = (section_top + SECTION_SIZE).min(height);
        // columns already emitted for this strip
        let mut emitted = vec![false; columns];

        for y in section_top..section_bottom {
            let old_row = &prev.data()[y * stride..(y + 1) * stride];
            let new_row = &next.data()[y * stride..(y + 1) * stride];

            for x in 0..width {
                if old_row[x * 4..x * 4 + 4] == new_row[x * 4..x * 4 + 4] {
                    continue;
                }
                let column = x / SECTION_SIZE;
                if emitted[column] {
                    continue;
                }
                emitted[column] = true;

                let section_left = column * SECTION_SIZE;
                let section_right = (section_left + SECTION_SIZE).min(width);
                #[allow(clippy::cast_possible_truncation)] // all values bounded by u16 dimensions
                tiles.push(DirtyRegion::new(
                    section_left as u16,
                    section_top as u16,
                    (section_right - section_left) as u16,
                    (section_bottom - section_top) as u16,
                ));
            }
        }
    }

    Ok(tiles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(width: u16, height: u16) -> (Framebuffer, Framebuffer) {
        (Framebuffer::new(width, height), Framebuffer::new(width, height))
    }

    #[test]
    fn first_frame_is_the_full_bounds() {
        let next = Framebuffer::new(100, 70);
        let tiles = changed_tiles(None, Some(&next)).unwrap();
        assert_eq!(tiles, vec![DirtyRegion::new(0, 0, 100, 70)]);
    }

    #[test]
    fn absent_next_frame_means_no_change() {
        let prev = Framebuffer::new(16, 16);
        assert!(changed_tiles(Some(&prev), None).unwrap().is_empty());
    }

    #[test]
    fn two_absent_frames_violate_the_contract() {
        assert!(matches!(
            changed_tiles(None, None),
            Err(RfbError::NoFramesToCompare)
        ));
    }

    #[test]
    fn mismatched_bounds_violate_the_contract() {
        let prev = Framebuffer::new(8, 8);
        let next = Framebuffer::new(8, 9);
        assert!(matches!(
            changed_tiles(Some(&prev), Some(&next)),
            Err(RfbError::BoundsMismatch { .. })
        ));
    }

    #[test]
    fn identical_frames_produce_no_tiles() {
        let (prev, next) = pair(130, 130);
        assert!(changed_tiles(Some(&prev), Some(&next)).unwrap().is_empty());
    }

    #[test]
    fn single_changed_pixel_yields_exactly_its_tile() {
        // sweep positions across tile interiors, edges and clipped borders
        for &(x, y) in &[(0u16, 0u16), (63, 63), (64, 0), (0, 64), (65, 70), (149, 99)] {
            let (prev, mut next) = pair(150, 100);
            next.set_pixel(x, y, 0xff, 0xff, 0xff);

            let tiles = changed_tiles(Some(&prev), Some(&next)).unwrap();
            assert_eq!(tiles.len(), 1, "one tile for a change at ({x},{y})");

            let t = tiles[0];
            assert_eq!(t.x % 64, 0);
            assert_eq!(t.y % 64, 0);
            assert!(t.width <= 64 && t.height <= 64);
            assert!(t.x <= x && x < t.x + t.width, "tile contains x={x}");
            assert!(t.y <= y && y < t.y + t.height, "tile contains y={y}");
        }
    }

    #[test]
    fn edge_tiles_are_clipped_to_the_image() {
        let (prev, mut next) = pair(150, 100);
        next.set_pixel(149, 99, 1, 2, 3);

        let tiles = changed_tiles(Some(&prev), Some(&next)).unwrap();
        assert_eq!(tiles, vec![DirtyRegion::new(128, 64, 22, 36)]);
    }

    #[test]
    fn two_changes_in_one_column_of_one_strip_share_a_tile() {
        let (prev, mut next) = pair(128, 128);
        next.set_pixel(10, 5, 0xff, 0, 0);
        next.set_pixel(40, 60, 0, 0xff, 0);

        let tiles = changed_tiles(Some(&prev), Some(&next)).unwrap();
        assert_eq!(tiles, vec![DirtyRegion::new(0, 0, 64, 64)]);
    }

    #[test]
    fn changes_in_different_strips_get_their_own_tiles() {
        let (prev, mut next) = pair(128, 128);
        next.set_pixel(10, 5, 0xff, 0, 0);
        next.set_pixel(10, 100, 0, 0xff, 0);

        let tiles = changed_tiles(Some(&prev), Some(&next)).unwrap();
        assert_eq!(
            tiles,
            vec![
                DirtyRegion::new(0, 0, 64, 64),
                DirtyRegion::new(0, 64, 64, 64),
            ]
        );
    }

    #[test]
    fn tiles_arrive_in_strip_major_encounter_order() {
        let (prev, mut next) = pair(200, 200);
        next.set_pixel(190, 10, 1, 1, 1); // strip 0, column 2
        next.set_pixel(5, 20, 1, 1, 1); // strip 0, column 0 (later row)
        next.set_pixel(70, 150, 1, 1, 1); // strip 2, column 1

        let tiles = changed_tiles(Some(&prev), Some(&next)).unwrap();
        assert_eq!(
            tiles,
            vec![
                DirtyRegion::new(128, 0, 64, 64),
                DirtyRegion::new(0, 0, 64, 64),
                DirtyRegion::new(64, 128, 64, 64),
            ]
        );
    }

    #[test]
    fn image_smaller_than_a_tile_is_one_clipped_tile() {
        let (prev, mut next) = pair(4, 4);
        next.set_pixel(1, 2, 0xff, 0, 0);

        let tiles = changed_tiles(Some(&prev), Some(&next)).unwrap();
        assert_eq!(tiles, vec![DirtyRegion::new(0, 0, 4, 4)]);
    }
}
