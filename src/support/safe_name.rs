//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of mhsync.
//
// mhsync is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// mhsync is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// mhsync. If not, see <http://www.gnu.org/licenses/>.

/// Determine whether the given name is "safe" to use as a local folder
/// directory directly under the base directory.
///
/// It excludes empty names and patterns that cause directory traversal, as
/// well as anything starting with `.`, since dot-files in the base directory
/// and in folder directories are reserved for our own bookkeeping (eviction
/// leftovers, the validity marker, the cursor).
///
/// This does not care about whether the name is ultimately a valid file name;
/// for that, we simply rely on the OS rejecting it.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty() &&
        name.chars().next() != Some('.') &&
        name.find('/').is_none() &&
        // Only a path separator on Windows, but always block since it has high
        // potential of causing problems
        name.find('\\').is_none() &&
        name.find(|c| c < ' ' || c == '\x7F').is_none()
}
